//! Client handles and in-flight request records
//!
//! Each submitted request gets an [`InFlight`] record owned by its client.
//! Two paths race to finish a record: the dispatch task with a reply, and
//! teardown (destroy or shutdown) with a cancellation. Whichever wins the
//! compare-exchange on the record's state delivers; the other is dropped.
//!
//! ```text
//! send ─► record ─► check ─► admission ─┬─► dispatch task ─► finish(reply)
//!                                        └─► pending queue ─┘
//! destroy/shutdown ─► close ─► drain records ─► claim ─► cancel
//! ```

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use kvrelay_protocol::{Reply, Request, ResultCode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::completion::{CancelReason, Completion, CompletionSink, Outcome};
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::pending_queue::PendingQueue;
use crate::types::{ClientId, RequestId, DEFAULT_MAX_PENDING};

const PENDING: u8 = 0;
const CLAIMED: u8 = 1;

thread_local! {
    /// Address of the client whose completion this thread is delivering
    static DELIVERING_FOR: Cell<usize> = const { Cell::new(0) };
}

/// Whether this thread is inside a completion delivery of any client
pub(crate) fn in_delivery() -> bool {
    DELIVERING_FOR.with(|c| c.get()) != 0
}

/// Per-client admission limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Requests in flight at once; 0 means unlimited
    pub max_outstanding: usize,

    /// Over the limit: reply `Busy` instead of queueing
    pub max_outstanding_error: bool,

    /// Bound on queued requests; overflow replies `Busy`
    pub max_pending: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_outstanding: 0,
            max_outstanding_error: false,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl ClientOptions {
    pub fn with_max_outstanding(max_outstanding: usize, strict: bool) -> Self {
        Self {
            max_outstanding,
            max_outstanding_error: strict,
            ..Self::default()
        }
    }
}

/// One submitted request awaiting its terminal outcome
pub(crate) struct InFlight {
    id: RequestId,
    request: Request,
    state: AtomicU8,
}

impl InFlight {
    fn new(id: RequestId, request: Request) -> Self {
        Self {
            id,
            request,
            state: AtomicU8::new(PENDING),
        }
    }

    /// Single-writer claim on the outcome
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }
}

struct Admission {
    outstanding: usize,
    queue: PendingQueue,
}

enum Admit {
    Dispatch,
    Queued,
    Busy,
}

/// Live clients of a router, for shutdown
pub(crate) type ClientTable = Arc<Mutex<HashMap<ClientId, Weak<ClientShared>>>>;

/// State shared between a handle and its dispatch tasks
pub(crate) struct ClientShared {
    id: ClientId,
    options: ClientOptions,
    sink: Box<dyn CompletionSink>,
    dispatcher: Arc<Dispatcher>,
    table: ClientTable,
    next_request_id: AtomicU64,
    records: Mutex<HashMap<RequestId, Arc<InFlight>>>,
    admission: Mutex<Admission>,
    closed: AtomicBool,
    /// Completions being delivered right now
    delivering: AtomicUsize,
}

impl ClientShared {
    pub(crate) fn new(
        id: ClientId,
        options: ClientOptions,
        sink: Box<dyn CompletionSink>,
        dispatcher: Arc<Dispatcher>,
        table: ClientTable,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            options,
            sink,
            dispatcher,
            table,
            next_request_id: AtomicU64::new(1),
            records: Mutex::new(HashMap::new()),
            admission: Mutex::new(Admission {
                outstanding: 0,
                queue: PendingQueue::new(options.max_pending),
            }),
            closed: AtomicBool::new(false),
            delivering: AtomicUsize::new(0),
        })
    }

    pub(crate) fn id(&self) -> ClientId {
        self.id
    }

    fn submit(self: &Arc<Self>, request: Request) -> Result<RequestId, ClientError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(InFlight::new(id, request));
        {
            let mut records = self.records.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            records.insert(id, Arc::clone(&record));
        }

        if let Err(e) = self.dispatcher.checker.check(&record.request) {
            debug!(client_id = self.id, request_id = id, error = %e, "Request rejected");
            let reply = Reply::for_op(record.request.op(), ResultCode::LocalError);
            self.complete_locally(record, Outcome::Reply(reply));
            return Ok(id);
        }

        let admit = {
            let mut admission = self.admission.lock();
            let limit = self.options.max_outstanding;
            if limit == 0 || admission.outstanding < limit {
                admission.outstanding += 1;
                Admit::Dispatch
            } else if self.options.max_outstanding_error {
                Admit::Busy
            } else if admission.queue.enqueue(id).is_ok() {
                Admit::Queued
            } else {
                Admit::Busy
            }
        };

        match admit {
            Admit::Dispatch => self.dispatch(record),
            Admit::Queued => trace!(client_id = self.id, request_id = id, "Request queued"),
            Admit::Busy => {
                debug!(client_id = self.id, request_id = id, "Too many outstanding requests");
                let reply = Reply::for_op(record.request.op(), ResultCode::Busy);
                self.complete_locally(record, Outcome::Reply(reply));
            }
        }
        Ok(id)
    }

    /// Finish a record on a dispatch thread without touching a backend
    fn complete_locally(self: &Arc<Self>, record: Arc<InFlight>, outcome: Outcome) {
        let shared = Arc::clone(self);
        self.dispatcher.handle.spawn(async move {
            shared.finish(&record, outcome);
        });
    }

    /// Run a record that holds an outstanding slot
    fn dispatch(self: &Arc<Self>, record: Arc<InFlight>) {
        let shared = Arc::clone(self);
        self.dispatcher.handle.spawn(async move {
            if record.is_pending() {
                let outcome = match shared.dispatcher.execute(&record.request).await {
                    Ok(reply) => Outcome::Reply(reply),
                    Err(e) => {
                        debug!(
                            client_id = shared.id,
                            request_id = record.id,
                            error = %e,
                            "Request unroutable"
                        );
                        Outcome::Cancelled(CancelReason::Unroutable)
                    }
                };
                shared.finish(&record, outcome);
            }
            shared.release_slot();
        });
    }

    /// Hand the slot to the next queued request, or give it back
    fn release_slot(self: &Arc<Self>) {
        let next = {
            let mut admission = self.admission.lock();
            loop {
                match admission.queue.dequeue_next() {
                    Some(id) => {
                        if let Some(record) = self.records.lock().get(&id).cloned() {
                            break Some(record);
                        }
                    }
                    None => {
                        admission.outstanding = admission.outstanding.saturating_sub(1);
                        break None;
                    }
                }
            }
        };
        if let Some(record) = next {
            self.dispatch(record);
        }
    }

    /// Deliver `outcome` unless the record was already claimed.
    ///
    /// Once the client is closed replies are suppressed; teardown owns every
    /// remaining record and cancels it.
    fn finish(&self, record: &InFlight, outcome: Outcome) -> bool {
        self.delivering.fetch_add(1, Ordering::SeqCst);
        let won = !(outcome.is_reply() && self.closed.load(Ordering::SeqCst)) && record.claim();
        if won {
            self.records.lock().remove(&record.id);
            self.deliver(record, outcome);
        }
        self.delivering.fetch_sub(1, Ordering::SeqCst);
        won
    }

    fn deliver(&self, record: &InFlight, outcome: Outcome) {
        let previous = DELIVERING_FOR.with(|c| c.replace(self.addr()));
        self.sink.deliver(Completion {
            id: record.id,
            request: record.request.clone(),
            outcome,
        });
        DELIVERING_FOR.with(|c| c.set(previous));
    }

    /// Close the client and cancel everything not yet finished.
    ///
    /// Returns once no completion of this client is being delivered on
    /// another thread, so nothing fires after it returns.
    pub(crate) fn cancel_all(&self, reason: CancelReason) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let mut drained: Vec<Arc<InFlight>> =
            self.records.lock().drain().map(|(_, r)| r).collect();
        self.admission.lock().queue.clear();
        drained.sort_by_key(|r| r.id);

        let mut cancelled = 0;
        for record in drained {
            if record.claim() {
                self.delivering.fetch_add(1, Ordering::SeqCst);
                self.deliver(&record, Outcome::Cancelled(reason));
                self.delivering.fetch_sub(1, Ordering::SeqCst);
                cancelled += 1;
            }
        }

        self.wait_for_deliveries();
        cancelled
    }

    fn wait_for_deliveries(&self) {
        // Called from inside one of our own completions
        let own = usize::from(DELIVERING_FOR.with(|c| c.get()) == self.addr());
        while self.delivering.load(Ordering::SeqCst) > own {
            std::thread::yield_now();
        }
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn unregister(&self) {
        self.table.lock().remove(&self.id);
    }
}

/// A caller's handle onto the router.
///
/// Dropping the handle cancels every request that has not completed yet.
pub struct ClientHandle {
    shared: Arc<ClientShared>,
}

impl ClientHandle {
    pub(crate) fn new(shared: Arc<ClientShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> ClientId {
        self.shared.id()
    }

    /// Submit requests without waiting for them.
    ///
    /// Returns the ids completions will carry. Fails with
    /// [`ClientError::Closed`] once the router has shut down; requests
    /// accepted before that still complete.
    pub fn send<I>(&self, requests: I) -> Result<Vec<RequestId>, ClientError>
    where
        I: IntoIterator<Item = Request>,
    {
        let requests = requests.into_iter();
        let mut ids = Vec::with_capacity(requests.size_hint().0);
        for request in requests {
            ids.push(self.shared.submit(request)?);
        }
        Ok(ids)
    }

    pub fn send_one(&self, request: Request) -> Result<RequestId, ClientError> {
        self.shared.submit(request)
    }

    /// Requests submitted but not yet completed
    pub fn outstanding(&self) -> usize {
        self.shared.records.lock().len()
    }

    pub fn queued(&self) -> usize {
        self.shared.admission.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Cancel outstanding requests and release the handle
    pub fn destroy(self) {}
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        let cancelled = self.shared.cancel_all(CancelReason::ClientDestroyed);
        self.shared.unregister();
        debug!(
            router = %self.shared.dispatcher.router,
            client_id = self.shared.id,
            cancelled,
            "Client destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_single_writer() {
        let record = InFlight::new(1, Request::get("k"));
        assert!(record.is_pending());
        assert!(record.claim());
        assert!(!record.claim());
        assert!(!record.is_pending());
    }

    #[test]
    fn test_concurrent_claims() {
        for _ in 0..100 {
            let record = Arc::new(InFlight::new(1, Request::get("k")));
            let winners: usize = (0..4)
                .map(|_| {
                    let record = Arc::clone(&record);
                    std::thread::spawn(move || usize::from(record.claim()))
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|t| t.join().unwrap())
                .sum();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn test_default_options_unlimited() {
        let options = ClientOptions::default();
        assert_eq!(options.max_outstanding, 0);
        assert!(!options.max_outstanding_error);

        let strict = ClientOptions::with_max_outstanding(4, true);
        assert_eq!(strict.max_outstanding, 4);
        assert!(strict.max_outstanding_error);
        assert_eq!(strict.max_pending, DEFAULT_MAX_PENDING);
    }
}
