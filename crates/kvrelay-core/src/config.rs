//! Routing configuration
//!
//! Parses the routing document into an immutable tree and validates it as a
//! whole: either every pool and route checks out or construction fails.
//!
//! # Resolution Decision Tree
//!
//! ```text
//! Request key arrives
//!        │
//!        ▼
//! Starts with '/'? ──Yes──► /region/cluster/rest
//!        │                        │
//!        No                 prefix configured? ──No──► unroutable
//!        │                        │Yes
//!        ▼                        ▼
//! default route            route for prefix
//!        │                        │
//!        └──────────┬─────────────┘
//!                   ▼
//!      PoolRoute ─► key override? ─► Pool
//!      NullRoute ─► answered locally
//!      ErrorRoute ─► unroutable
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, RouteError};
use crate::pool::Pool;
use crate::types::{PoolName, RoutingPrefix, SelectionPolicy};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    #[serde(default)]
    pools: BTreeMap<PoolName, PoolDocument>,
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    routes: Vec<RouteDocument>,
    /// Key prefix → pool
    #[serde(default)]
    pool_overrides: BTreeMap<String, PoolName>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolDocument {
    #[serde(default)]
    servers: Vec<String>,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteDocument {
    prefix: RoutingPrefix,
    route: String,
}

/// A parsed route expression
#[derive(Debug, Clone)]
pub enum Route {
    /// `PoolRoute|<pool>`
    Pool(Arc<Pool>),
    /// `NullRoute`: answered locally without a backend
    Null,
    /// `ErrorRoute`: every request is unroutable
    Error,
}

enum RouteExpr {
    Pool(PoolName),
    Null,
    Error,
}

/// Where a request goes
#[derive(Debug, Clone)]
pub enum Destination<'k> {
    Pool { pool: Arc<Pool>, key: &'k str },
    Null,
}

/// Validated, immutable routing tree
#[derive(Debug)]
pub struct RouterConfig {
    pools: HashMap<PoolName, Arc<Pool>>,
    routes: HashMap<RoutingPrefix, Route>,
    /// Longest key prefix first
    overrides: Vec<(String, Arc<Pool>)>,
    default_route: RoutingPrefix,
}

impl RouterConfig {
    /// Parse and validate a JSON routing document
    pub fn from_json(document: &str, default_route: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument = serde_json::from_str(document)?;
        Self::from_document(document, default_route)
    }

    fn from_document(doc: ConfigDocument, default_route: &str) -> Result<Self, ConfigError> {
        if !is_routing_prefix(default_route) {
            return Err(ConfigError::InvalidRoutingPrefix(default_route.to_string()));
        }

        let mut exprs: Vec<(RoutingPrefix, RouteExpr)> = Vec::new();
        for route in &doc.routes {
            if !is_routing_prefix(&route.prefix) {
                return Err(ConfigError::InvalidRoutingPrefix(route.prefix.clone()));
            }
            if exprs.iter().any(|(prefix, _)| *prefix == route.prefix) {
                return Err(ConfigError::InvalidRoutingPrefix(format!(
                    "{} (duplicate)",
                    route.prefix
                )));
            }
            exprs.push((route.prefix.clone(), parse_route(&route.prefix, &route.route)?));
        }
        if let Some(route) = &doc.route {
            if !exprs.iter().any(|(prefix, _)| prefix == default_route) {
                exprs.push((default_route.to_string(), parse_route(default_route, route)?));
            }
        }
        if exprs.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        if !exprs.iter().any(|(prefix, _)| prefix == default_route) {
            return Err(ConfigError::MissingDefaultRoute(default_route.to_string()));
        }

        // Every pool reachable from a route or override must exist
        let mut reachable: Vec<&str> = Vec::new();
        for (prefix, expr) in &exprs {
            if let RouteExpr::Pool(name) = expr {
                if !doc.pools.contains_key(name) {
                    return Err(ConfigError::UndefinedPool {
                        route: prefix.clone(),
                        pool: name.clone(),
                    });
                }
                reachable.push(name);
            }
        }
        for (key_prefix, name) in &doc.pool_overrides {
            if !doc.pools.contains_key(name) {
                return Err(ConfigError::UndefinedPool {
                    route: format!("override {key_prefix}"),
                    pool: name.clone(),
                });
            }
            reachable.push(name);
        }

        let mut pools = HashMap::with_capacity(doc.pools.len());
        for (name, pool_doc) in &doc.pools {
            let pool = build_pool(name, pool_doc)?;
            if pool.servers().is_empty() && reachable.contains(&name.as_str()) {
                return Err(ConfigError::EmptyPool(name.clone()));
            }
            pools.insert(name.clone(), Arc::new(pool));
        }

        let routes = exprs
            .into_iter()
            .map(|(prefix, expr)| {
                let route = match expr {
                    RouteExpr::Pool(name) => Route::Pool(Arc::clone(&pools[&name])),
                    RouteExpr::Null => Route::Null,
                    RouteExpr::Error => Route::Error,
                };
                (prefix, route)
            })
            .collect::<HashMap<_, _>>();

        let mut overrides: Vec<(String, Arc<Pool>)> = doc
            .pool_overrides
            .iter()
            .map(|(key_prefix, name)| (key_prefix.clone(), Arc::clone(&pools[name])))
            .collect();
        overrides.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        debug!(
            pools = pools.len(),
            routes = routes.len(),
            overrides = overrides.len(),
            default_route = %default_route,
            "Routing config validated"
        );

        Ok(Self {
            pools,
            routes,
            overrides,
            default_route: default_route.to_string(),
        })
    }

    /// Resolve a request key to its destination.
    ///
    /// Keys carrying a routing prefix are stripped of it; the returned key is
    /// what the backend sees.
    pub fn resolve<'k>(&self, key: &'k str) -> Result<Destination<'k>, RouteError> {
        let (prefix, key) = if key.starts_with('/') {
            split_routing_prefix(key)
                .ok_or_else(|| RouteError::UnknownRoutingPrefix(key.to_string()))?
        } else {
            (self.default_route.as_str(), key)
        };

        let route = self
            .routes
            .get(prefix)
            .ok_or_else(|| RouteError::UnknownRoutingPrefix(prefix.to_string()))?;

        match route {
            Route::Error => Err(RouteError::ErrorRoute(prefix.to_string())),
            Route::Null => Ok(Destination::Null),
            Route::Pool(pool) => {
                let pool = self
                    .overrides
                    .iter()
                    .find(|(key_prefix, _)| key.starts_with(key_prefix.as_str()))
                    .map(|(_, pool)| pool)
                    .unwrap_or(pool);
                Ok(Destination::Pool {
                    pool: Arc::clone(pool),
                    key,
                })
            }
        }
    }

    pub fn default_route(&self) -> &str {
        &self.default_route
    }

    pub fn pool(&self, name: &str) -> Option<&Arc<Pool>> {
        self.pools.get(name)
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    pub fn route(&self, prefix: &str) -> Option<&Route> {
        self.routes.get(prefix)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

fn parse_route(prefix: &str, expression: &str) -> Result<RouteExpr, ConfigError> {
    let invalid = || ConfigError::InvalidRoute {
        prefix: prefix.to_string(),
        expression: expression.to_string(),
    };
    match expression.trim() {
        "NullRoute" => Ok(RouteExpr::Null),
        "ErrorRoute" => Ok(RouteExpr::Error),
        other => {
            let name = other.strip_prefix("PoolRoute|").ok_or_else(invalid)?;
            if name.is_empty() || name.contains('|') {
                return Err(invalid());
            }
            Ok(RouteExpr::Pool(name.to_string()))
        }
    }
}

fn build_pool(name: &str, doc: &PoolDocument) -> Result<Pool, ConfigError> {
    let policy = match doc.policy.as_deref() {
        None => SelectionPolicy::default(),
        Some(policy) => SelectionPolicy::parse(policy).ok_or_else(|| ConfigError::InvalidPolicy {
            pool: name.to_string(),
            policy: policy.to_string(),
        })?,
    };
    let servers = doc
        .servers
        .iter()
        .map(|address| {
            address
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidBackend {
                    pool: name.to_string(),
                    address: address.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pool = Pool::new(name.to_string(), servers, policy);
    Ok(match doc.timeout_ms {
        Some(ms) => pool.with_timeout(Duration::from_millis(ms)),
        None => pool,
    })
}

/// Split `/region/cluster/rest` into (`/region/cluster/`, `rest`)
fn split_routing_prefix(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix('/')?;
    let region_end = rest.find('/')?;
    let cluster = &rest[region_end + 1..];
    let cluster_end = cluster.find('/')?;
    if region_end == 0 || cluster_end == 0 {
        return None;
    }
    let prefix_len = region_end + cluster_end + 3;
    Some((&key[..prefix_len], &key[prefix_len..]))
}

fn is_routing_prefix(prefix: &str) -> bool {
    matches!(split_routing_prefix(prefix), Some((_, "")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "/a/b/";

    fn config(json: &str) -> Result<RouterConfig, ConfigError> {
        RouterConfig::from_json(json, DEFAULT)
    }

    fn full_config() -> RouterConfig {
        config(
            r#"{
                "pools": {
                    "A": { "servers": ["127.0.0.1:11211"] },
                    "B": { "servers": ["127.0.0.1:11212", "127.0.0.1:11213"], "policy": "round-robin", "timeout_ms": 50 },
                    "S": { "servers": ["127.0.0.1:11214"] },
                    "spare": { "servers": [] }
                },
                "routes": [
                    { "prefix": "/a/b/", "route": "PoolRoute|A" },
                    { "prefix": "/c/d/", "route": "PoolRoute|B" },
                    { "prefix": "/null/x/", "route": "NullRoute" },
                    { "prefix": "/err/x/", "route": "ErrorRoute" }
                ],
                "pool_overrides": { "session:": "S", "session:long:": "B" }
            }"#,
        )
        .unwrap()
    }

    fn pool_name(dest: Destination<'_>) -> (String, String) {
        match dest {
            Destination::Pool { pool, key } => (pool.name().to_string(), key.to_string()),
            Destination::Null => ("<null>".to_string(), String::new()),
        }
    }

    #[test]
    fn test_split_routing_prefix() {
        assert_eq!(split_routing_prefix("/a/b/key"), Some(("/a/b/", "key")));
        assert_eq!(split_routing_prefix("/a/b/"), Some(("/a/b/", "")));
        assert_eq!(split_routing_prefix("/a//key"), None);
        assert_eq!(split_routing_prefix("//b/key"), None);
        assert_eq!(split_routing_prefix("/a/key"), None);
        assert_eq!(split_routing_prefix("a/b/"), None);
    }

    #[test]
    fn test_valid_config() {
        let cfg = full_config();
        assert_eq!(cfg.route_count(), 4);
        assert_eq!(cfg.default_route(), DEFAULT);
        let b = cfg.pool("B").unwrap();
        assert_eq!(b.policy(), SelectionPolicy::RoundRobin);
        assert_eq!(b.timeout(), Some(Duration::from_millis(50)));
        assert!(matches!(cfg.route("/null/x/"), Some(Route::Null)));
    }

    #[test]
    fn test_resolve_default_and_prefixed() {
        let cfg = full_config();
        assert_eq!(pool_name(cfg.resolve("foo").unwrap()), ("A".into(), "foo".into()));
        assert_eq!(pool_name(cfg.resolve("/c/d/foo").unwrap()), ("B".into(), "foo".into()));
        assert_eq!(pool_name(cfg.resolve("/null/x/foo").unwrap()).0, "<null>");
    }

    #[test]
    fn test_resolve_failures() {
        let cfg = full_config();
        assert_eq!(
            cfg.resolve("/nope/x/foo").unwrap_err(),
            RouteError::UnknownRoutingPrefix("/nope/x/".into())
        );
        assert!(matches!(cfg.resolve("/bad"), Err(RouteError::UnknownRoutingPrefix(_))));
        assert_eq!(
            cfg.resolve("/err/x/foo").unwrap_err(),
            RouteError::ErrorRoute("/err/x/".into())
        );
    }

    #[test]
    fn test_longest_override_wins() {
        let cfg = full_config();
        assert_eq!(pool_name(cfg.resolve("session:1").unwrap()).0, "S");
        assert_eq!(pool_name(cfg.resolve("session:long:1").unwrap()).0, "B");
        assert_eq!(pool_name(cfg.resolve("/c/d/session:1").unwrap()).0, "S");
    }

    #[test]
    fn test_single_route_binds_default() {
        let cfg = config(r#"{ "pools": { "A": { "servers": ["127.0.0.1:1"] } }, "route": "PoolRoute|A" }"#)
            .unwrap();
        assert!(matches!(cfg.route(DEFAULT), Some(Route::Pool(_))));
    }

    #[test]
    fn test_undefined_pool_names_route_and_pool() {
        let err = config(r#"{ "pools": {}, "route": "PoolRoute|missing" }"#).unwrap_err();
        match err {
            ConfigError::UndefinedPool { route, pool } => {
                assert_eq!(route, DEFAULT);
                assert_eq!(pool, "missing");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_undefined_override_pool() {
        let err = config(
            r#"{ "pools": { "A": { "servers": ["127.0.0.1:1"] } },
                 "route": "PoolRoute|A",
                 "pool_overrides": { "x:": "ghost" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedPool { pool, .. } if pool == "ghost"));
    }

    #[test]
    fn test_reachable_empty_pool_rejected() {
        let err = config(r#"{ "pools": { "A": { "servers": [] } }, "route": "PoolRoute|A" }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPool(name) if name == "A"));
    }

    #[test]
    fn test_unreachable_pool_still_syntax_checked() {
        let err = config(
            r#"{ "pools": { "A": { "servers": ["127.0.0.1:1"] },
                            "unused": { "servers": ["not-an-address"] } },
                 "route": "PoolRoute|A" }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackend { pool, .. } if pool == "unused"));
    }

    #[test]
    fn test_invalid_policy() {
        let err = config(
            r#"{ "pools": { "A": { "servers": ["127.0.0.1:1"], "policy": "random" } },
                 "route": "PoolRoute|A" }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy { .. }));
    }

    #[test]
    fn test_invalid_route_expressions() {
        for expr in ["PoolRoute|", "PoolRoute|a|b", "HashRoute|A", ""] {
            let json = format!(
                r#"{{ "pools": {{ "A": {{ "servers": ["127.0.0.1:1"] }} }}, "route": "{expr}" }}"#
            );
            assert!(
                matches!(config(&json), Err(ConfigError::InvalidRoute { .. })),
                "accepted {expr:?}"
            );
        }
    }

    #[test]
    fn test_routing_prefix_validation() {
        let err = config(r#"{ "routes": [ { "prefix": "/a/", "route": "NullRoute" } ] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoutingPrefix(_)));

        let err = RouterConfig::from_json(r#"{ "route": "NullRoute" }"#, "a/b").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoutingPrefix(_)));
    }

    #[test]
    fn test_missing_default_route() {
        let err = config(r#"{ "routes": [ { "prefix": "/x/y/", "route": "NullRoute" } ] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDefaultRoute(route) if route == DEFAULT));
    }

    #[test]
    fn test_no_routes_and_parse_errors() {
        assert!(matches!(config(r#"{ "pools": {} }"#), Err(ConfigError::NoRoutes)));
        assert!(matches!(config("{ not json"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            config(r#"{ "route": "NullRoute", "surprise": 1 }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
