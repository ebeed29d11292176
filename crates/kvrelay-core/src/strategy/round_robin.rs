//! Round-robin strategy for backend selection

use std::sync::atomic::{AtomicUsize, Ordering};

use super::BackendStrategy;

/// Rotates through backends regardless of key
#[derive(Debug)]
pub struct RoundRobinStrategy {
    backends: usize,
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new(backends: usize) -> Self {
        Self {
            backends,
            next: AtomicUsize::new(0),
        }
    }
}

impl BackendStrategy for RoundRobinStrategy {
    fn select(&self, _routing_key: &str) -> Option<usize> {
        if self.backends == 0 {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        Some(index % self.backends)
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}
