//! Common types for the router
//!
//! Centralizes identifiers and defaults shared across modules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pool name as written in the routing document
pub type PoolName = String;

/// Routing prefix of the form `/region/cluster/`
pub type RoutingPrefix = String;

/// Identifies a request within its client handle
pub type RequestId = u64;

/// Identifies a client handle within its router
pub type ClientId = u64;

/// Default per-request backend timeout
pub const DEFAULT_SERVER_TIMEOUT_MS: u64 = 1000;

/// Default backend connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Default number of dispatch worker threads
pub const DEFAULT_NUM_PROXIES: usize = 2;

/// Default routing prefix
pub const DEFAULT_ROUTE: &str = "/global/default/";

/// Longest key accepted from a client
pub const MAX_KEY_LENGTH: usize = 250;

/// Default bound on requests waiting for an outstanding slot
pub const DEFAULT_MAX_PENDING: usize = 65_536;

/// How a pool picks one of its backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionPolicy {
    /// Same key → same backend
    #[default]
    ConsistentHash,
    /// Rotate through backends
    RoundRobin,
}

impl SelectionPolicy {
    /// Parse the policy name used in routing documents
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hash" | "consistent-hash" => Some(SelectionPolicy::ConsistentHash),
            "round-robin" | "rr" => Some(SelectionPolicy::RoundRobin),
            _ => None,
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::ConsistentHash => write!(f, "hash"),
            SelectionPolicy::RoundRobin => write!(f, "round-robin"),
        }
    }
}

/// Router lifecycle.
///
/// Validation happens inside `Router::init`; a router value only exists
/// once it is `Ready`, and failed validation never produces one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterState {
    Ready = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl RouterState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => RouterState::Ready,
            2 => RouterState::ShuttingDown,
            _ => RouterState::Terminated,
        }
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterState::Ready => write!(f, "ready"),
            RouterState::ShuttingDown => write!(f, "shutting-down"),
            RouterState::Terminated => write!(f, "terminated"),
        }
    }
}
