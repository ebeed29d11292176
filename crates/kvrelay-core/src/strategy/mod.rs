//! Backend selection strategies
//!
//! - `ConsistentHashStrategy`: same key → same backend (default)
//! - `RoundRobinStrategy`: rotates through backends
//!
//! # Selection Hierarchy
//!
//! ```text
//! Request key
//!     │
//!     ▼
//! ┌─────────────────────────┐
//! │   Route resolution      │  (RouterConfig: routing prefix → pool)
//! │   (Which pool?)         │
//! └───────────┬─────────────┘
//!             │
//!             ▼
//! ┌─────────────────────────┐
//! │   Backend selection     │  (ConsistentHashStrategy / RoundRobinStrategy)
//! │   (Which server?)       │
//! └─────────────────────────┘
//! ```

mod consistent_hash;
mod round_robin;

pub use consistent_hash::ConsistentHashStrategy;
pub use round_robin::RoundRobinStrategy;

use std::net::SocketAddr;

use crate::types::SelectionPolicy;

/// Trait for backend selection strategies.
///
/// A strategy is built for one fixed server list and answers with indices
/// into it.
pub trait BackendStrategy: Send + Sync {
    /// Index of the server for this routing key, `None` when the list is empty
    fn select(&self, routing_key: &str) -> Option<usize>;

    /// Strategy name for logging
    fn name(&self) -> &'static str;
}

/// Build the strategy implementing a configured policy over `servers`
pub fn for_policy(policy: SelectionPolicy, servers: &[SocketAddr]) -> Box<dyn BackendStrategy> {
    match policy {
        SelectionPolicy::ConsistentHash => Box::new(ConsistentHashStrategy::new(servers)),
        SelectionPolicy::RoundRobin => Box::new(RoundRobinStrategy::new(servers.len())),
    }
}
