//! Router instance
//!
//! A router owns the validated routing config, the backend connections and
//! the dispatch runtime its clients run on.
//!
//! ```text
//! init ──validate──► Ready ──shutdown──► ShuttingDown ──► Terminated
//!   │
//!   └── invalid config: Err, no router
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{BackendManager, BackendSettings};
use crate::check::RequestChecker;
use crate::client::{self, ClientHandle, ClientOptions, ClientShared, ClientTable};
use crate::completion::{CancelReason, CompletionSink, Completions};
use crate::config::RouterConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ClientError, RouterError};
use crate::options::RouterOptions;
use crate::types::RouterState;

pub struct Router {
    name: String,
    instance_id: Uuid,
    state: AtomicU8,
    dispatcher: Arc<Dispatcher>,
    runtime: Mutex<Option<Runtime>>,
    clients: ClientTable,
    next_client_id: AtomicU64,
}

impl Router {
    /// Validate the routing config and start the dispatch runtime.
    ///
    /// An invalid config yields an error and no router; callers treat that
    /// as fatal.
    pub fn init(name: impl Into<String>, options: RouterOptions) -> Result<Arc<Self>, RouterError> {
        let name = name.into();
        let config = RouterConfig::from_json(&options.config, &options.default_route)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.num_proxies.max(1))
            .thread_name(format!("kvrelay-{name}"))
            .enable_all()
            .build()?;

        let settings = BackendSettings {
            connect_timeout: Duration::from_millis(options.connect_timeout_ms),
            max_frame_size: options.max_frame_size,
            decode_mode: options.decode_mode,
        };
        let dispatcher = Arc::new(Dispatcher {
            router: name.clone(),
            config: Arc::new(config),
            backends: BackendManager::new(settings),
            server_timeout: Duration::from_millis(options.server_timeout_ms),
            checker: RequestChecker::default(),
            handle: runtime.handle().clone(),
        });

        let router = Arc::new(Self {
            name,
            instance_id: Uuid::new_v4(),
            state: AtomicU8::new(RouterState::Ready as u8),
            dispatcher,
            runtime: Mutex::new(Some(runtime)),
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_client_id: AtomicU64::new(1),
        });

        info!(
            router = %router.name,
            instance_id = %router.instance_id,
            default_route = %router.config().default_route(),
            routes = router.config().route_count(),
            proxies = options.num_proxies.max(1),
            "Router ready"
        );
        Ok(router)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinguishes successive routers initialized under one name
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RouterState::Ready
    }

    pub fn config(&self) -> &RouterConfig {
        &self.dispatcher.config
    }

    /// Handle onto the dispatch runtime
    pub fn runtime_handle(&self) -> Handle {
        self.dispatcher.handle.clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Create a client whose completions go to `sink`
    pub fn create_client(
        &self,
        sink: impl CompletionSink + 'static,
        options: ClientOptions,
    ) -> Result<ClientHandle, ClientError> {
        let mut clients = self.clients.lock();
        if !self.is_ready() {
            return Err(ClientError::NotReady(self.name.clone()));
        }

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let shared = ClientShared::new(
            id,
            options,
            Box::new(sink),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.clients),
        );
        clients.insert(id, Arc::downgrade(&shared));

        debug!(router = %self.name, client_id = id, ?options, "Client created");
        Ok(ClientHandle::new(shared))
    }

    /// Create a client whose completions are read from a channel
    pub fn create_channel_client(
        &self,
        options: ClientOptions,
    ) -> Result<(ClientHandle, Completions), ClientError> {
        let (tx, completions) = Completions::channel();
        let client = self.create_client(tx, options)?;
        Ok((client, completions))
    }

    /// Stop the router, cancelling every request still in flight.
    ///
    /// Safe to call more than once. A call that overlaps another returns
    /// only once the router is `Terminated`, except from inside a completion,
    /// where it returns at once.
    pub fn shutdown(&self) {
        if self
            .state
            .compare_exchange(
                RouterState::Ready as u8,
                RouterState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // The running shutdown may be waiting on the delivery we are in
            if !client::in_delivery() {
                while self.state() != RouterState::Terminated {
                    std::thread::yield_now();
                }
            }
            return;
        }
        info!(router = %self.name, "Router shutting down");

        let clients: Vec<Arc<ClientShared>> = self
            .clients
            .lock()
            .drain()
            .filter_map(|(_, client)| client.upgrade())
            .collect();
        let mut cancelled = 0;
        for client in &clients {
            cancelled += client.cancel_all(CancelReason::Shutdown);
        }

        self.dispatcher.backends.close_all();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }

        self.state
            .store(RouterState::Terminated as u8, Ordering::Release);
        info!(
            router = %self.name,
            clients = clients.len(),
            cancelled,
            "Router terminated"
        );
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}
