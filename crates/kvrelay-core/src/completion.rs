//! Request completions
//!
//! Every request accepted by a client handle ends in exactly one
//! [`Completion`]: the backend reply or a cancellation. Completions are
//! pushed through a [`CompletionSink`], either a channel read with
//! [`Completions`] or a pair of closures wrapped in [`Callbacks`].

use std::fmt;

use kvrelay_protocol::{Reply, Request};
use tokio::sync::mpsc;

use crate::types::RequestId;

/// Why a request was cancelled instead of answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The owning client handle was destroyed first
    ClientDestroyed,
    /// The router shut down first
    Shutdown,
    /// No destination resolved for the key
    Unroutable,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::ClientDestroyed => write!(f, "client destroyed"),
            CancelReason::Shutdown => write!(f, "shutdown"),
            CancelReason::Unroutable => write!(f, "unroutable"),
        }
    }
}

/// Terminal outcome of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(Reply),
    Cancelled(CancelReason),
}

impl Outcome {
    pub fn is_reply(&self) -> bool {
        matches!(self, Outcome::Reply(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Id returned by `send`
    pub id: RequestId,
    /// The request as it was submitted
    pub request: Request,
    pub outcome: Outcome,
}

/// Receives completions, on a dispatch thread or on the thread tearing
/// the client down.
///
/// Implementations must not block for long; they may drop or destroy the
/// client handle they belong to.
pub trait CompletionSink: Send + Sync {
    fn deliver(&self, completion: Completion);
}

impl CompletionSink for mpsc::UnboundedSender<Completion> {
    fn deliver(&self, completion: Completion) {
        // Receiver gone means nobody is waiting
        let _ = self.send(completion);
    }
}

/// Closure pair invoked on reply and on cancel
pub struct Callbacks<R, C> {
    on_reply: R,
    on_cancel: C,
}

impl<R, C> Callbacks<R, C>
where
    R: Fn(RequestId, Request, Reply) + Send + Sync,
    C: Fn(RequestId, Request, CancelReason) + Send + Sync,
{
    pub fn new(on_reply: R, on_cancel: C) -> Self {
        Self {
            on_reply,
            on_cancel,
        }
    }
}

impl<R, C> CompletionSink for Callbacks<R, C>
where
    R: Fn(RequestId, Request, Reply) + Send + Sync,
    C: Fn(RequestId, Request, CancelReason) + Send + Sync,
{
    fn deliver(&self, completion: Completion) {
        match completion.outcome {
            Outcome::Reply(reply) => (self.on_reply)(completion.id, completion.request, reply),
            Outcome::Cancelled(reason) => {
                (self.on_cancel)(completion.id, completion.request, reason)
            }
        }
    }
}

/// Receiving end of a channel client
#[derive(Debug)]
pub struct Completions {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Completions {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Completion>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next completion; `None` once the client is gone and drained
    pub async fn recv(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Completion> {
        self.rx.try_recv().ok()
    }

    /// Blocking variant for callers outside the runtime
    pub fn blocking_recv(&mut self) -> Option<Completion> {
        self.rx.blocking_recv()
    }
}
