//! Backend pools
//!
//! A pool is a named, ordered set of backend servers plus the strategy used
//! to pick one of them for a key. Pools are immutable once the routing
//! config is built.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::trace;

use crate::error::RouteError;
use crate::strategy::{self, BackendStrategy};
use crate::types::{PoolName, SelectionPolicy};

pub struct Pool {
    name: PoolName,
    servers: Vec<SocketAddr>,
    policy: SelectionPolicy,
    /// Overrides the router-wide server timeout
    timeout: Option<Duration>,
    strategy: Box<dyn BackendStrategy>,
}

impl Pool {
    pub fn new(name: PoolName, servers: Vec<SocketAddr>, policy: SelectionPolicy) -> Self {
        let strategy = strategy::for_policy(policy, &servers);
        Self {
            name,
            servers,
            policy,
            timeout: None,
            strategy,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Pick the backend serving `routing_key`
    pub fn select(&self, routing_key: &str) -> Result<SocketAddr, RouteError> {
        let idx = self
            .strategy
            .select(routing_key)
            .ok_or_else(|| RouteError::NoBackend(self.name.clone()))?;
        let addr = self.servers[idx];
        trace!(
            pool = %self.name,
            strategy = self.strategy.name(),
            backend = %addr,
            "Backend selected"
        );
        Ok(addr)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("servers", &self.servers)
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_server_pool() {
        let addr: SocketAddr = "127.0.0.1:11211".parse().unwrap();
        let pool = Pool::new("A".to_string(), vec![addr], SelectionPolicy::ConsistentHash);

        assert_eq!(pool.select("anything").unwrap(), addr);
        assert_eq!(pool.select("").unwrap(), addr);
    }

    #[test]
    fn test_empty_pool_has_no_backend() {
        let pool = Pool::new("empty".to_string(), vec![], SelectionPolicy::RoundRobin);
        assert_eq!(
            pool.select("k"),
            Err(RouteError::NoBackend("empty".to_string()))
        );
    }
}
