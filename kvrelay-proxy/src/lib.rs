//! kvrelay proxy - standalone process around the core router
//!
//! The proxy is responsible for:
//! - Loading router options from the environment
//! - Binding its listening socket or adopting an inherited one
//! - Serving until interrupted, then shutting the router down

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use kvrelay_core::{ProxyServer, Router, RouterError, RouterOptions};
use kvrelay_protocol::frame::FrameDecoder;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("Listening socket error: {0}")]
    Listen(#[from] io::Error),

    #[error("Proxy server stopped: {0}")]
    Stopped(String),
}

/// Proxy process configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Router instance name
    pub name: String,

    pub listen_addr: String,

    /// Inherited listening socket; takes precedence over `listen_addr`
    pub listen_sock_fd: Option<i32>,

    pub router: RouterOptions,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name: "kvrelay".to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            listen_sock_fd: None,
            router: RouterOptions::default(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = ProxyConfig {
            router: RouterOptions::from_env(),
            ..ProxyConfig::default()
        };

        if let Ok(name) = std::env::var("KVRELAY_NAME") {
            config.name = name;
        }

        if let Ok(addr) = std::env::var("KVRELAY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Ok(fd) = std::env::var("KVRELAY_LISTEN_SOCK_FD") {
            if let Ok(fd) = fd.trim().parse() {
                config.listen_sock_fd = Some(fd);
            }
        }

        config
    }
}

/// A running router plus its listening socket
pub struct Proxy {
    config: ProxyConfig,
    router: Arc<Router>,
}

impl Proxy {
    /// Validate the routing config and start the router
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let router = Router::init(config.name.clone(), config.router.clone())?;
        Ok(Self { config, router })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The inherited socket if one was handed over, else a fresh bind
    pub fn open_listener(&self) -> Result<std::net::TcpListener, ProxyError> {
        match self.config.listen_sock_fd {
            Some(fd) => inherit_listener(fd),
            None => Ok(std::net::TcpListener::bind(&self.config.listen_addr)?),
        }
    }

    /// Start serving on the router's runtime
    pub fn start(&self) -> Result<(SocketAddr, JoinHandle<io::Result<()>>), ProxyError> {
        let listener = self.open_listener()?;
        let addr = listener.local_addr()?;
        let decoder = FrameDecoder::new(
            self.config.router.max_frame_size,
            self.config.router.decode_mode,
        );
        let server = ProxyServer::new(Arc::clone(&self.router)).with_decoder(decoder);
        info!(
            router = %self.router.name(),
            addr = %addr,
            inherited = self.config.listen_sock_fd.is_some(),
            "Proxy started"
        );
        Ok((addr, server.spawn(listener)))
    }

    /// Serve until the server fails or the process is interrupted
    pub async fn run(self) -> Result<(), ProxyError> {
        let (_, server) = self.start()?;

        let result = tokio::select! {
            res = server => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ProxyError::Listen(e)),
                Err(e) => Err(ProxyError::Stopped(e.to_string())),
            },
            _ = tokio::signal::ctrl_c() => {
                info!(router = %self.router.name(), "Interrupted");
                Ok(())
            }
        };

        self.router.shutdown();
        result
    }
}

#[cfg(unix)]
fn inherit_listener(fd: i32) -> Result<std::net::TcpListener, ProxyError> {
    use std::os::unix::io::FromRawFd;

    if fd < 0 {
        return Err(ProxyError::Listen(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid listening socket descriptor {fd}"),
        )));
    }
    // SAFETY: the supervisor hands over ownership of an open listening socket
    Ok(unsafe { std::net::TcpListener::from_raw_fd(fd) })
}

#[cfg(not(unix))]
fn inherit_listener(fd: i32) -> Result<std::net::TcpListener, ProxyError> {
    Err(ProxyError::Listen(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot inherit listening socket {fd} on this platform"),
    )))
}
