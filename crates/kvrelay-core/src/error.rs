//! Error types for the router

use thiserror::Error;

/// Routing document rejected during validation.
///
/// Every variant names the pool or route at fault so the operator can fix
/// the document; construction never yields a partially valid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Document is not valid JSON or has the wrong shape
    #[error("Failed to parse routing config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A route or override names a pool that is not defined
    #[error("Route {route} references undefined pool {pool}")]
    UndefinedPool { route: String, pool: String },

    /// A reachable pool has no servers
    #[error("Pool {0} is reachable but has no servers")]
    EmptyPool(String),

    /// Route expression is not well formed
    #[error("Invalid route expression for {prefix}: {expression}")]
    InvalidRoute { prefix: String, expression: String },

    /// Unknown selection policy
    #[error("Pool {pool} has invalid policy {policy}")]
    InvalidPolicy { pool: String, policy: String },

    /// Backend address does not parse
    #[error("Pool {pool} has invalid server address {address}")]
    InvalidBackend { pool: String, address: String },

    /// Routing prefix is not of the form /region/cluster/
    #[error("Invalid routing prefix: {0}")]
    InvalidRoutingPrefix(String),

    /// The default route is not among the configured routes
    #[error("Default route {0} is not configured")]
    MissingDefaultRoute(String),

    /// Neither `route` nor `routes` present
    #[error("Routing config defines no routes")]
    NoRoutes,
}

/// Router instance error types
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another live router already owns this name
    #[error("Router name already in use: {0}")]
    NameInUse(String),

    /// Dispatch runtime could not be started
    #[error("Failed to start dispatch runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Client handle error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Router is shutting down or terminated
    #[error("Router {0} is not ready")]
    NotReady(String),

    /// Handle was destroyed or its router shut down
    #[error("Client is closed")]
    Closed,
}

/// Per-request resolution failure; delivered as a cancellation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("No route for routing prefix {0}")]
    UnknownRoutingPrefix(String),

    #[error("Route {0} rejects all requests")]
    ErrorRoute(String),

    #[error("Pool {0} has no backend available")]
    NoBackend(String),
}
