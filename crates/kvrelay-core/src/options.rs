//! Router options

use kvrelay_protocol::frame::DEFAULT_MAX_FRAME_SIZE;
use kvrelay_protocol::DecodeMode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_NUM_PROXIES, DEFAULT_ROUTE, DEFAULT_SERVER_TIMEOUT_MS,
};

/// Options bundle handed to [`Router::init`](crate::Router::init)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOptions {
    /// Routing document (JSON)
    pub config: String,

    /// Routing prefix used for keys without one
    pub default_route: String,

    /// Dispatch worker threads
    pub num_proxies: usize,

    /// Per-request backend timeout unless the pool sets its own
    pub server_timeout_ms: u64,

    pub connect_timeout_ms: u64,

    /// How backend replies with mistyped fields are treated
    pub decode_mode: DecodeMode,

    pub max_frame_size: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            config: String::new(),
            default_route: DEFAULT_ROUTE.to_string(),
            num_proxies: DEFAULT_NUM_PROXIES,
            server_timeout_ms: DEFAULT_SERVER_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            decode_mode: DecodeMode::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl RouterOptions {
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            ..Self::default()
        }
    }

    pub fn with_default_route(mut self, route: impl Into<String>) -> Self {
        self.default_route = route.into();
        self
    }

    pub fn with_server_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.server_timeout_ms = timeout_ms;
        self
    }

    /// Load options from environment variables
    pub fn from_env() -> Self {
        let mut options = RouterOptions::default();

        if let Ok(config) = std::env::var("KVRELAY_CONFIG") {
            options.config = config;
        } else if let Ok(path) = std::env::var("KVRELAY_CONFIG_FILE") {
            match std::fs::read_to_string(&path) {
                Ok(config) => options.config = config,
                Err(e) => warn!(path = %path, error = %e, "Failed to read routing config file"),
            }
        }

        if let Ok(route) = std::env::var("KVRELAY_DEFAULT_ROUTE") {
            options.default_route = route;
        }

        if let Ok(n) = std::env::var("KVRELAY_NUM_PROXIES") {
            if let Ok(n) = n.parse() {
                options.num_proxies = n;
            }
        }

        if let Ok(ms) = std::env::var("KVRELAY_SERVER_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                options.server_timeout_ms = ms;
            }
        }

        options
    }
}
