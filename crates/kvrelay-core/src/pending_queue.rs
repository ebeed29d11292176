//! Pending queue for requests waiting on an outstanding slot

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::RequestId;

/// Pending queue errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingQueueError {
    #[error("Queue is full (max size: {0})")]
    QueueFull(usize),
}

#[derive(Debug)]
struct PendingRequest {
    id: RequestId,
    enqueued_at: Instant,
}

/// FIFO of request ids; the records themselves stay with the client
#[derive(Debug)]
pub struct PendingQueue {
    max_size: usize,
    queue: VecDeque<PendingRequest>,
}

impl PendingQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            queue: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, id: RequestId) -> Result<(), PendingQueueError> {
        if self.queue.len() >= self.max_size {
            warn!(
                queue_size = self.queue.len(),
                max_size = self.max_size,
                "Pending queue is full"
            );
            return Err(PendingQueueError::QueueFull(self.max_size));
        }

        self.queue.push_back(PendingRequest {
            id,
            enqueued_at: Instant::now(),
        });

        debug!(request_id = id, queue_size = self.queue.len(), "Request queued");
        Ok(())
    }

    /// Dequeue the next request (FIFO)
    pub fn dequeue_next(&mut self) -> Option<RequestId> {
        let pending = self.queue.pop_front()?;
        debug!(
            request_id = pending.id,
            waited_ms = pending.enqueued_at.elapsed().as_millis() as u64,
            queue_size = self.queue.len(),
            "Queued request released"
        );
        Some(pending.id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
