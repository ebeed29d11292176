//! Shared test fixtures: a framed mock backend and a recording sink

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use kvrelay_core::{Completion, CompletionSink, Outcome};
use kvrelay_protocol::frame::{self, FrameDecoder};
use kvrelay_protocol::{
    DecodeMode, DeleteReply, GetReply, Reply, Request, ResultCode, SetReply,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Key that makes the mock wait `ms` before answering
pub fn delay_key(ms: u64) -> String {
    format!("__mock__.delay_ms({ms})")
}

fn parse_delay(key: &str) -> Option<u64> {
    key.strip_prefix("__mock__.delay_ms(")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

type Store = Arc<Mutex<HashMap<String, (Bytes, u64)>>>;

/// In-memory key-value backend speaking the frame protocol.
///
/// Runs on its own runtime so it outlives router shutdowns.
pub struct MockBackend {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    runtime: Option<Runtime>,
}

impl MockBackend {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        // Bound outside the runtime so tests may start it from async code
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let store: Store = Arc::new(Mutex::new(HashMap::new()));

        let seen = Arc::clone(&requests);
        runtime.spawn(async move {
            let listener = TcpListener::from_std(listener).unwrap();
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, Arc::clone(&store), Arc::clone(&seen)));
            }
        });

        Self {
            addr,
            requests,
            runtime: Some(runtime),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Requests received so far
    pub fn requests_seen(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, store: Store, seen: Arc<AtomicUsize>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                return;
            }
        }
    });

    let decoder = FrameDecoder::default();
    let mut buf = BytesMut::new();
    loop {
        while let Ok(Some(frame)) = decoder.decode(&mut buf) {
            seen.fetch_add(1, Ordering::SeqCst);
            let id = frame.request_id;
            let Ok(request) = frame.into_request(DecodeMode::Strict) else {
                return;
            };
            let store = Arc::clone(&store);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(ms) = parse_delay(request.key()) {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                let reply = apply(&store, request);
                let _ = tx.send(frame::encode_reply(id, &reply));
            });
        }
        match read_half.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn apply(store: &Store, request: Request) -> Reply {
    let mut store = store.lock();
    match request {
        Request::Get(get) => Reply::Get(match store.get(&get.key) {
            Some((value, flags)) => GetReply::hit(value.clone(), *flags),
            None => GetReply::with_result(ResultCode::NotFound),
        }),
        Request::Set(set) => {
            store.insert(set.key, (set.value, set.flags));
            Reply::Set(SetReply {
                result: ResultCode::Stored,
            })
        }
        Request::Delete(delete) => Reply::Delete(DeleteReply {
            result: if store.remove(&delete.key).is_some() {
                ResultCode::Deleted
            } else {
                ResultCode::NotFound
            },
        }),
    }
}

/// Routing document with one pool `A` on the default route
pub fn single_pool_config(backends: &[SocketAddr]) -> String {
    let servers: Vec<String> = backends.iter().map(|a| format!("\"{a}\"")).collect();
    format!(
        r#"{{
            "pools": {{ "A": {{ "servers": [{}] }} }},
            "route": "PoolRoute|A"
        }}"#,
        servers.join(", ")
    )
}

/// Sink that records completions and counts outcomes
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

struct RecorderInner {
    tx: Mutex<std_mpsc::Sender<Completion>>,
    rx: Mutex<std_mpsc::Receiver<Completion>>,
    replies: AtomicUsize,
    cancels: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = std_mpsc::channel();
        Self {
            inner: Arc::new(RecorderInner {
                tx: Mutex::new(tx),
                rx: Mutex::new(rx),
                replies: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            }),
        }
    }

    pub fn replies(&self) -> usize {
        self.inner.replies.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.inner.cancels.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.replies() + self.cancels()
    }

    /// Collect `n` completions or panic after `timeout`
    pub fn wait_for(&self, n: usize, timeout: Duration) -> Vec<Completion> {
        let deadline = Instant::now() + timeout;
        let rx = self.inner.rx.lock();
        let mut completions = Vec::with_capacity(n);
        while completions.len() < n {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(completion) => completions.push(completion),
                Err(_) => panic!("got {} of {n} completions", completions.len()),
            }
        }
        completions
    }

    /// Nothing more arrives within `window`
    pub fn assert_quiet(&self, window: Duration) {
        if let Ok(extra) = self.inner.rx.lock().recv_timeout(window) {
            panic!("unexpected completion {extra:?}");
        }
    }
}

impl CompletionSink for Recorder {
    fn deliver(&self, completion: Completion) {
        match completion.outcome {
            Outcome::Reply(_) => self.inner.replies.fetch_add(1, Ordering::SeqCst),
            Outcome::Cancelled(_) => self.inner.cancels.fetch_add(1, Ordering::SeqCst),
        };
        let _ = self.inner.tx.lock().send(completion);
    }
}
