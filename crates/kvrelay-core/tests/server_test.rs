//! Proxy server tests over real sockets

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use common::{init_tracing, single_pool_config, MockBackend};
use kvrelay_core::{ProxyServer, Router, RouterOptions};
use kvrelay_protocol::frame::{self, Frame, FrameDecoder};
use kvrelay_protocol::{DecodeMode, Reply, Request, ResultCode, SetReply, WireStruct};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(3);

struct Peer {
    stream: TcpStream,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl Peer {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
            decoder: FrameDecoder::default(),
        }
    }

    async fn send(&mut self, wire_id: u64, request: &Request) {
        self.stream
            .write_all(&frame::encode_request(wire_id, request))
            .await
            .unwrap();
    }

    /// Next reply frame, `None` on EOF or timeout
    async fn next(&mut self, wait: Duration) -> Option<Frame> {
        tokio::time::timeout(wait, async {
            loop {
                if let Some(frame) = self.decoder.decode(&mut self.buf).unwrap() {
                    return Some(frame);
                }
                if self.stream.read_buf(&mut self.buf).await.ok()? == 0 {
                    return None;
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    async fn reply(&mut self) -> (u64, Reply) {
        let frame = self.next(WAIT).await.expect("no reply");
        let id = frame.request_id;
        (id, frame.into_reply(DecodeMode::Strict).unwrap())
    }
}

fn start_proxy(name: &str, backend: &MockBackend, listener: std::net::TcpListener) -> Arc<Router> {
    let config = format!(
        r#"{{
            "pools": {{ "A": {{ "servers": ["{}"] }} }},
            "routes": [
                {{ "prefix": "/global/default/", "route": "PoolRoute|A" }},
                {{ "prefix": "/dead/x/", "route": "ErrorRoute" }}
            ]
        }}"#,
        backend.addr()
    );
    let router = Router::init(name, RouterOptions::new(config)).unwrap();
    ProxyServer::new(Arc::clone(&router)).spawn(listener);
    router
}

#[tokio::test]
async fn test_requests_through_proxy() {
    init_tracing();
    let backend = MockBackend::start();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let _router = start_proxy("proxy", &backend, listener);

    let mut peer = Peer::connect(addr).await;
    peer.send(100, &Request::set("k", &b"v"[..])).await;
    let (id, reply) = peer.reply().await;
    assert_eq!(id, 100);
    assert_eq!(reply.result(), ResultCode::Stored);

    peer.send(7, &Request::get("k")).await;
    let (id, reply) = peer.reply().await;
    assert_eq!(id, 7);
    match reply {
        Reply::Get(get) => assert_eq!(get.value.as_deref(), Some(&b"v"[..])),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_cancelled_request_gets_no_reply() {
    init_tracing();
    let backend = MockBackend::start();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let _router = start_proxy("cancel", &backend, listener);

    let mut peer = Peer::connect(addr).await;
    peer.send(1, &Request::get("/dead/x/k")).await;
    peer.send(2, &Request::delete("missing")).await;

    let (id, reply) = peer.reply().await;
    assert_eq!(id, 2);
    assert_eq!(reply.result(), ResultCode::NotFound);
    assert!(peer.next(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_desync_closes_connection() {
    init_tracing();
    let backend = MockBackend::start();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let router = start_proxy("desync", &backend, listener);

    let mut peer = Peer::connect(addr).await;
    // Envelope opens an i16 field and stops before its value
    peer.stream.write_all(&[0, 0, 0, 2, 3, 1]).await.unwrap();
    assert!(peer.next(WAIT).await.is_none());

    // Other connections are unaffected
    let mut other = Peer::connect(addr).await;
    other.send(9, &Request::get("k")).await;
    assert_eq!(other.reply().await.0, 9);
    assert!(router.is_ready());
}

#[tokio::test]
async fn test_unknown_op_answered_with_local_error() {
    init_tracing();
    let backend = MockBackend::start();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let _router = start_proxy("unknown-op", &backend, listener);

    let mut peer = Peer::connect(addr).await;
    // Well-formed frame carrying an op this build does not know
    peer.stream
        .write_all(&frame::encode_result(77, 5, ResultCode::Ok))
        .await
        .unwrap();

    let frame = peer.next(WAIT).await.expect("connection closed");
    assert_eq!(frame.request_id, 5);
    assert_eq!(frame.op, 77);
    let reply = SetReply::decode(frame.body).unwrap();
    assert_eq!(reply.result, ResultCode::LocalError);

    // The connection keeps serving
    peer.send(6, &Request::get("k")).await;
    let (id, reply) = peer.reply().await;
    assert_eq!(id, 6);
    assert_eq!(reply.result(), ResultCode::NotFound);
}

#[cfg(unix)]
#[tokio::test]
async fn test_inherited_listening_socket() {
    use std::os::unix::io::{FromRawFd, IntoRawFd};

    init_tracing();
    let backend = MockBackend::start();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Hand the socket over by descriptor the way a supervisor would
    let fd = listener.into_raw_fd();
    let inherited = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    let _router = start_proxy("inherited", &backend, inherited);

    let mut peer = Peer::connect(addr).await;
    peer.send(42, &Request::get("nothing")).await;
    let (id, reply) = peer.reply().await;
    assert_eq!(id, 42);
    assert_eq!(reply.result(), ResultCode::NotFound);
}
