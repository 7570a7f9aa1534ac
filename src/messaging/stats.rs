//! Dispatch statistics.
//!
//! Counters are updated with relaxed atomics and sharded maps so recording
//! never blocks a dispatch. Snapshots are eventually consistent.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::ResponseStatus;

/// Live counters owned by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
    per_method: DashMap<String, u64>,
    per_status: DashMap<&'static str, u64>,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, method: &str) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        *self.per_method.entry(method.to_string()).or_insert(0) += 1;
    }

    pub fn record_status(&self, status: ResponseStatus) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        *self.per_status.entry(status.as_str()).or_insert(0) += 1;
        if status == ResponseStatus::Timeout {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        } else if status.is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MessagingStats {
        MessagingStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            per_method: self
                .per_method
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            per_status: self
                .per_status
                .iter()
                .map(|e| ((*e.key()).to_string(), *e.value()))
                .collect(),
        }
    }

    pub fn reset(&self) {
        self.requests_sent.store(0, Ordering::Relaxed);
        self.responses_received.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.per_method.clear();
        self.per_status.clear();
    }
}

/// Serializable statistics snapshot returned by
/// [`RequestDispatcher::get_statistics`](super::RequestDispatcher::get_statistics).
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessagingStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub per_method: HashMap<String, u64>,
    pub per_status: HashMap<String, u64>,
}
