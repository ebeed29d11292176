//! Named routers owned by the embedding scope

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::RouterError;
use crate::options::RouterOptions;
use crate::router::Router;

/// Routers keyed by name.
///
/// A name maps to at most one live router; reusing it is explicit through
/// [`get`](Self::get).
#[derive(Debug, Default)]
pub struct RouterRegistry {
    routers: Mutex<HashMap<String, Arc<Router>>>,
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize a router under `name`.
    ///
    /// Fails with [`RouterError::NameInUse`] while a ready router holds the
    /// name. A router that has already shut down is replaced.
    pub fn init(&self, name: &str, options: RouterOptions) -> Result<Arc<Router>, RouterError> {
        let mut routers = self.routers.lock();
        if let Some(existing) = routers.get(name) {
            if existing.is_ready() {
                return Err(RouterError::NameInUse(name.to_string()));
            }
            debug!(router = %name, "Replacing terminated router");
        }

        let router = Router::init(name, options)?;
        routers.insert(name.to_string(), Arc::clone(&router));
        Ok(router)
    }

    /// The ready router registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<Router>> {
        self.routers
            .lock()
            .get(name)
            .filter(|router| router.is_ready())
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Router>> {
        self.routers.lock().remove(name)
    }

    /// Shut down and forget the router under `name`
    pub fn shutdown(&self, name: &str) -> bool {
        match self.remove(name) {
            Some(router) => {
                router.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn shutdown_all(&self) {
        let routers: Vec<_> = self.routers.lock().drain().map(|(_, r)| r).collect();
        for router in routers {
            router.shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.routers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.lock().is_empty()
    }
}
