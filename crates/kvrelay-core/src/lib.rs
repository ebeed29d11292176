//! kvrelay core - request routing and dispatch
//!
//! Routes key-value requests from many clients to pools of backend servers
//! and guarantees every accepted request exactly one terminal outcome: a
//! reply or a cancellation.
//!
//! # Architecture
//!
//! ```text
//! ClientHandle::send
//!     │
//!     ▼
//! ┌─────────────────────────┐
//! │     RouterConfig        │  routing prefix → route → pool
//! │   (Which pool?)         │
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │     Pool + strategy     │  consistent hash / round robin
//! │   (Which backend?)      │
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │   BackendConnection     │  multiplexed framed session
//! └───────────┬─────────────┘
//!             │
//!             ▼
//!     Completion (reply | cancelled)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kvrelay_core::{ClientOptions, Outcome, Router, RouterOptions};
//! use kvrelay_protocol::Request;
//!
//! let router = Router::init("main", RouterOptions::new(config_json))?;
//! let (client, mut completions) = router.create_channel_client(ClientOptions::default())?;
//! client.send([Request::get("foo")])?;
//!
//! match completions.recv().await.map(|c| c.outcome) {
//!     Some(Outcome::Reply(reply)) => println!("{}", reply.result()),
//!     other => println!("{other:?}"),
//! }
//! ```

// Core modules
mod error;
mod options;
mod types;

// Routing
mod config;
mod pool;
mod strategy;

// Dispatch
mod backend;
mod check;
mod client;
mod completion;
mod dispatch;
mod pending_queue;

// Instances
mod registry;
mod router;
mod server;

// Re-exports: Error types
pub use error::{ClientError, ConfigError, RouteError, RouterError};

// Re-exports: Core types
pub use types::{
    ClientId, PoolName, RequestId, RouterState, RoutingPrefix, SelectionPolicy,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_PENDING, DEFAULT_NUM_PROXIES, DEFAULT_ROUTE,
    DEFAULT_SERVER_TIMEOUT_MS, MAX_KEY_LENGTH,
};
pub use options::RouterOptions;

// Re-exports: Routing
pub use config::{Destination, Route, RouterConfig};
pub use pool::Pool;
pub use strategy::{BackendStrategy, ConsistentHashStrategy, RoundRobinStrategy};

// Re-exports: Dispatch
pub use backend::{BackendConnection, BackendError, BackendManager, BackendSettings};
pub use check::{CheckError, RequestChecker};
pub use client::{ClientHandle, ClientOptions};
pub use completion::{CancelReason, Callbacks, Completion, CompletionSink, Completions, Outcome};
pub use pending_queue::{PendingQueue, PendingQueueError};

// Re-exports: Instances
pub use registry::RouterRegistry;
pub use router::Router;
pub use server::ProxyServer;
