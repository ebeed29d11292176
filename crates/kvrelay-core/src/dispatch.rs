//! Per-request dispatch

use std::sync::Arc;
use std::time::Duration;

use kvrelay_protocol::{Op, Reply, Request, ResultCode};
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::backend::BackendManager;
use crate::check::RequestChecker;
use crate::config::{Destination, RouterConfig};
use crate::error::RouteError;

/// Everything a dispatch task needs, shared by all clients of a router
pub(crate) struct Dispatcher {
    pub(crate) router: String,
    pub(crate) config: Arc<RouterConfig>,
    pub(crate) backends: BackendManager,
    pub(crate) server_timeout: Duration,
    pub(crate) checker: RequestChecker,
    pub(crate) handle: Handle,
}

impl Dispatcher {
    /// Route `request` and wait for its reply.
    ///
    /// Backend failures come back as error replies; only resolution failures
    /// are errors.
    pub(crate) async fn execute(&self, request: &Request) -> Result<Reply, RouteError> {
        match self.config.resolve(request.key())? {
            Destination::Null => Ok(null_reply(request.op())),
            Destination::Pool { pool, key } => {
                let backend = pool.select(key)?;
                let timeout = pool.timeout().unwrap_or(self.server_timeout);
                let routed = request.with_key(key);

                trace!(
                    router = %self.router,
                    pool = %pool.name(),
                    backend = %backend,
                    op = %request.op(),
                    "Dispatching request"
                );

                match self.backends.connection(backend).call(&routed, timeout).await {
                    Ok(reply) => Ok(reply),
                    Err(e) => {
                        debug!(
                            router = %self.router,
                            pool = %pool.name(),
                            backend = %backend,
                            error = %e,
                            "Backend request failed"
                        );
                        Ok(Reply::for_op(request.op(), e.result_code()))
                    }
                }
            }
        }
    }
}

/// Local answer for `NullRoute`
fn null_reply(op: Op) -> Reply {
    let result = match op {
        Op::Get | Op::Delete => ResultCode::NotFound,
        Op::Set => ResultCode::NotStored,
    };
    Reply::for_op(op, result)
}
