//! Backend connections
//!
//! One multiplexed TCP session per backend address, shared by every client
//! of the router. Requests are tagged with a session-local id and replies
//! are matched back by that id, so a slow reply never blocks the others.
//!
//! ```text
//! call() ──frame──► writer task ──► backend
//!   ▲                                  │
//!   └── oneshot ◄── reader task ◄──────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use kvrelay_protocol::frame::{self, FrameDecoder};
use kvrelay_protocol::{DecodeMode, Reply, Request, ResultCode, WireError};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Per-request backend failure; surfaces as an error reply
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },

    #[error("I/O error on backend {addr}: {reason}")]
    Io { addr: SocketAddr, reason: String },

    #[error("Backend did not reply within {0:?}")]
    Timeout(Duration),

    #[error("Backend connection closed")]
    Closed,

    #[error("Malformed reply from backend: {0}")]
    Wire(#[from] WireError),
}

impl BackendError {
    /// Result code carried by the error reply
    pub fn result_code(&self) -> ResultCode {
        match self {
            BackendError::Connect { .. } => ResultCode::ConnectError,
            BackendError::Timeout(_) => ResultCode::Timeout,
            BackendError::Io { .. } | BackendError::Closed | BackendError::Wire(_) => {
                ResultCode::RemoteError
            }
        }
    }
}

type ReplySender = oneshot::Sender<Result<Reply, BackendError>>;

/// Settings shared by every backend connection of a router
#[derive(Debug, Clone, Copy)]
pub struct BackendSettings {
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
    pub decode_mode: DecodeMode,
}

struct Session {
    addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<Bytes>,
    pending: Mutex<HashMap<u64, ReplySender>>,
    closed: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Session {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail every waiting request and stop both tasks
    fn close(&self, error: BackendError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending: Vec<ReplySender> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        debug!(
            backend = %self.addr,
            failed = pending.len(),
            error = %error,
            "Backend session closed"
        );
        for tx in pending {
            let _ = tx.send(Err(error.clone()));
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn complete(&self, request_id: u64, result: Result<Reply, BackendError>) {
        match self.pending.lock().remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            // Caller already gave up on it
            None => trace!(backend = %self.addr, request_id, "Late reply dropped"),
        }
    }
}

/// Forgets a request id once its caller stops waiting
struct PendingEntry<'a> {
    session: &'a Session,
    request_id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.session.pending.lock().remove(&self.request_id);
    }
}

/// Lazily connected session to one backend
pub struct BackendConnection {
    addr: SocketAddr,
    settings: BackendSettings,
    session: Mutex<Option<Arc<Session>>>,
    connecting: tokio::sync::Mutex<()>,
    /// Completed connect attempts, successful or not
    connect_attempts: AtomicU64,
    last_connect_error: Mutex<Option<BackendError>>,
    next_id: AtomicU64,
}

impl BackendConnection {
    pub fn new(addr: SocketAddr, settings: BackendSettings) -> Self {
        Self {
            addr,
            settings,
            session: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
            connect_attempts: AtomicU64::new(0),
            last_connect_error: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.live_session().is_some()
    }

    /// Send one request and wait for its reply.
    ///
    /// `timeout` bounds the whole exchange, connecting included.
    pub async fn call(&self, request: &Request, timeout: Duration) -> Result<Reply, BackendError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(timeout, self.exchange(request_id, request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(backend = %self.addr, request_id, ?timeout, "Backend request timed out");
                Err(BackendError::Timeout(timeout))
            }
        }
    }

    async fn exchange(&self, request_id: u64, request: &Request) -> Result<Reply, BackendError> {
        let session = self.session().await?;
        let (tx, rx) = oneshot::channel();
        session.pending.lock().insert(request_id, tx);
        let _entry = PendingEntry {
            session: &session,
            request_id,
        };

        session
            .outgoing
            .send(frame::encode_request(request_id, request))
            .map_err(|_| BackendError::Closed)?;
        rx.await.unwrap_or(Err(BackendError::Closed))
    }

    /// Drop the current session, failing its waiting requests
    pub fn close(&self) {
        if let Some(session) = self.session.lock().take() {
            session.close(BackendError::Closed);
        }
    }

    fn live_session(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| !s.is_closed())
            .cloned()
    }

    async fn session(&self) -> Result<Arc<Session>, BackendError> {
        if let Some(session) = self.live_session() {
            return Ok(session);
        }

        let attempts_seen = self.connect_attempts.load(Ordering::Acquire);
        let _guard = self.connecting.lock().await;
        if let Some(session) = self.live_session() {
            return Ok(session);
        }
        // An attempt finished while we queued behind it: share its failure
        if self.connect_attempts.load(Ordering::Acquire) != attempts_seen {
            if let Some(error) = self.last_connect_error.lock().clone() {
                return Err(error);
            }
        }

        let result = self.connect().await;
        match &result {
            Ok(session) => {
                *self.session.lock() = Some(Arc::clone(session));
                *self.last_connect_error.lock() = None;
            }
            Err(error) => {
                debug!(backend = %self.addr, error = %error, "Backend connect failed");
                *self.last_connect_error.lock() = Some(error.clone());
            }
        }
        self.connect_attempts.fetch_add(1, Ordering::Release);
        result
    }

    async fn connect(&self) -> Result<Arc<Session>, BackendError> {
        let addr = self.addr;
        let stream =
            match tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(addr))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(BackendError::Connect {
                        addr,
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(BackendError::Connect {
                        addr,
                        reason: format!("timed out after {:?}", self.settings.connect_timeout),
                    })
                }
            };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (outgoing, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            addr,
            outgoing,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::with_capacity(2)),
        });

        let writer = tokio::spawn(write_loop(Arc::clone(&session), write_half, rx));
        let decoder = FrameDecoder::new(self.settings.max_frame_size, self.settings.decode_mode);
        let reader = tokio::spawn(read_loop(Arc::clone(&session), read_half, decoder));
        session
            .tasks
            .lock()
            .extend([writer.abort_handle(), reader.abort_handle()]);

        debug!(backend = %addr, "Backend connected");
        Ok(session)
    }
}

async fn write_loop(
    session: Arc<Session>,
    mut stream: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = stream.write_all(&frame).await {
            session.close(BackendError::Io {
                addr: session.addr,
                reason: e.to_string(),
            });
            return;
        }
    }
}

async fn read_loop(session: Arc<Session>, mut stream: OwnedReadHalf, decoder: FrameDecoder) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        loop {
            let frame = match decoder.decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(backend = %session.addr, error = %e, "Backend stream desynchronized");
                    session.close(BackendError::Wire(e));
                    return;
                }
            };
            let request_id = frame.request_id;
            match frame.into_reply(decoder.mode()) {
                Ok(reply) => session.complete(request_id, Ok(reply)),
                Err(e) if e.is_desync() => {
                    warn!(backend = %session.addr, error = %e, "Backend reply desynchronized");
                    session.close(BackendError::Wire(e));
                    return;
                }
                Err(e) => session.complete(request_id, Err(BackendError::Wire(e))),
            }
        }

        match stream.read_buf(&mut buf).await {
            Ok(0) => {
                session.close(BackendError::Closed);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                session.close(BackendError::Io {
                    addr: session.addr,
                    reason: e.to_string(),
                });
                return;
            }
        }
    }
}

/// All backend connections of one router
pub struct BackendManager {
    settings: BackendSettings,
    connections: Mutex<HashMap<SocketAddr, Arc<BackendConnection>>>,
}

impl BackendManager {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            settings,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection(&self, addr: SocketAddr) -> Arc<BackendConnection> {
        let mut connections = self.connections.lock();
        Arc::clone(
            connections
                .entry(addr)
                .or_insert_with(|| Arc::new(BackendConnection::new(addr, self.settings))),
        )
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn close_all(&self) {
        let connections: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in &connections {
            connection.close();
        }
        debug!(closed = connections.len(), "Backend connections released");
    }
}
