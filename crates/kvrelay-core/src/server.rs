//! Listening-socket front end
//!
//! Accepts framed requests on a listener it is handed (bound here or
//! inherited from a supervisor) and runs each connection through its own
//! client handle.
//!
//! ```text
//! socket ─► reader ─► ClientHandle::send ─► router
//!                                              │
//! socket ◄─ writer ◄─ Completions ◄────────────┘
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use kvrelay_protocol::frame::{self, FrameDecoder};
use kvrelay_protocol::ResultCode;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::client::{ClientHandle, ClientOptions};
use crate::completion::{Completions, Outcome};
use crate::router::Router;
use crate::types::RequestId;

/// Maps the router's request ids back to the ids the peer used
type WireIds = Arc<Mutex<HashMap<RequestId, u64>>>;

/// Pause after the process runs out of descriptors
const FD_EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

// errno values shared by Linux and the BSDs
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// How long the accept loop should wait after a failed accept
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.raw_os_error() {
        Some(EMFILE) | Some(ENFILE) => Some(FD_EXHAUSTED_BACKOFF),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ProxyServer {
    router: Arc<Router>,
    decoder: FrameDecoder,
    client_options: ClientOptions,
    connections: Arc<AtomicUsize>,
}

impl ProxyServer {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            decoder: FrameDecoder::default(),
            client_options: ClientOptions::default(),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Connections currently open
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Run the accept loop on the router's runtime
    pub fn spawn(self, listener: std::net::TcpListener) -> JoinHandle<io::Result<()>> {
        let handle = self.router.runtime_handle();
        handle.spawn(async move { self.serve(listener).await })
    }

    /// Accept connections until the runtime stops.
    ///
    /// Failed accepts are logged and skipped; only listener setup errors are
    /// returned.
    pub async fn serve(&self, listener: std::net::TcpListener) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        info!(
            router = %self.router.name(),
            addr = %listener.local_addr()?,
            "Proxy listening"
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(router = %self.router.name(), error = %e, "Accept error");
                    if let Some(pause) = accept_backoff(&e) {
                        tokio::time::sleep(pause).await;
                    }
                    continue;
                }
            };
            let server = self.clone();
            tokio::spawn(async move {
                server.connections.fetch_add(1, Ordering::Relaxed);
                server.handle_connection(stream, peer).await;
                server.connections.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let created = self.router.create_channel_client(self.client_options);
        let (client, completions) = match created {
            Ok(pair) => pair,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Refusing connection");
                return;
            }
        };
        let _ = stream.set_nodelay(true);
        debug!(peer = %peer, client_id = client.id(), "Connection accepted");

        let (mut read_half, write_half) = stream.into_split();
        let wire_ids: WireIds = Arc::new(Mutex::new(HashMap::new()));
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            write_half,
            completions,
            direct_rx,
            Arc::clone(&wire_ids),
        ));

        let mut buf = BytesMut::with_capacity(8 * 1024);
        'conn: loop {
            loop {
                match self.decoder.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        let wire_id = frame.request_id;
                        let op = frame.op;
                        match frame.into_request(self.decoder.mode()) {
                            Ok(request) => {
                                if !submit(&client, &wire_ids, wire_id, request) {
                                    break 'conn;
                                }
                            }
                            Err(e) if e.is_desync() => {
                                warn!(peer = %peer, error = %e, "Request desynchronized");
                                break 'conn;
                            }
                            Err(e) => {
                                debug!(
                                    peer = %peer,
                                    request_id = wire_id,
                                    error = %e,
                                    "Malformed request"
                                );
                                let reply =
                                    frame::encode_result(op, wire_id, ResultCode::LocalError);
                                let _ = direct_tx.send(reply);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Stream desynchronized, closing connection");
                        break 'conn;
                    }
                }
            }

            match read_half.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Read failed");
                    break;
                }
            }
        }

        let client_id = client.id();
        drop(client);
        writer.abort();
        debug!(peer = %peer, client_id, "Connection closed");
    }
}

fn submit(
    client: &ClientHandle,
    wire_ids: &WireIds,
    wire_id: u64,
    request: kvrelay_protocol::Request,
) -> bool {
    // Held across send so the completion cannot overtake the mapping
    let mut ids = wire_ids.lock();
    match client.send_one(request) {
        Ok(id) => {
            ids.insert(id, wire_id);
            true
        }
        Err(e) => {
            debug!(client_id = client.id(), error = %e, "Client closed");
            false
        }
    }
}

async fn write_loop(
    mut stream: OwnedWriteHalf,
    mut completions: Completions,
    mut direct: mpsc::UnboundedReceiver<Bytes>,
    wire_ids: WireIds,
) {
    loop {
        let bytes = tokio::select! {
            completion = completions.recv() => {
                let Some(completion) = completion else { return };
                let wire_id = wire_ids.lock().remove(&completion.id);
                let Some(wire_id) = wire_id else { continue };
                match completion.outcome {
                    Outcome::Reply(reply) => frame::encode_reply(wire_id, &reply),
                    Outcome::Cancelled(reason) => {
                        trace!(request_id = wire_id, %reason, "Request cancelled, no reply");
                        continue;
                    }
                }
            }
            Some(bytes) = direct.recv() => bytes,
        };
        if let Err(e) = stream.write_all(&bytes).await {
            debug!(error = %e, "Write failed");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_on_descriptor_exhaustion() {
        let emfile = io::Error::from_raw_os_error(EMFILE);
        let enfile = io::Error::from_raw_os_error(ENFILE);
        assert_eq!(accept_backoff(&emfile), Some(FD_EXHAUSTED_BACKOFF));
        assert_eq!(accept_backoff(&enfile), Some(FD_EXHAUSTED_BACKOFF));
    }

    #[test]
    fn test_accept_retries_transient_errors_immediately() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(accept_backoff(&aborted), None);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(accept_backoff(&reset), None);
    }
}
