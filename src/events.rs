//! Orchestrator events.
//!
//! State changes are published as [`OrchestratorEvent`]s over an unbounded
//! channel. Events are always emitted after the corresponding state mutation
//! and never while an internal lock is held.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted by the registry, engine, and transaction coordinator.
#[derive(Clone, Debug, Serialize)]
pub enum OrchestratorEvent {
    ServiceRegistered {
        provider: String,
        method: String,
        replaced: bool,
        timestamp: DateTime<Utc>,
    },
    ServiceUnregistered {
        provider: String,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: String,
        step_id: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: String,
        step_id: String,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        execution_id: String,
        step_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepRetrying {
        execution_id: String,
        step_id: String,
        retry_index: u32,
        timestamp: DateTime<Utc>,
    },
    StepSkipped {
        execution_id: String,
        step_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionProgress {
        execution_id: String,
        progress: f64,
        current_step: Option<String>,
    },
    ExecutionCompleted {
        execution_id: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: String,
        timestamp: DateTime<Utc>,
    },
    RollbackStarted {
        transaction_id: String,
        execution_id: String,
        timestamp: DateTime<Utc>,
    },
    RollbackStepFailed {
        transaction_id: String,
        step_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RollbackCompleted {
        transaction_id: String,
        failed_compensations: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Event sender handle.
pub type EventSender = mpsc::UnboundedSender<OrchestratorEvent>;

/// Event receiver handle.
pub type EventReceiver = mpsc::UnboundedReceiver<OrchestratorEvent>;

/// Create an event channel.
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Sender wrapper with an atomic active flag so that event emission can be
/// cheaply skipped when no subscriber is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: EventSender,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: EventSender, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    /// Emitter with no subscriber; every emit is a no-op.
    pub fn disabled() -> Self {
        let (tx, _rx) = create_event_channel();
        Self {
            tx,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        if self.is_active() {
            let _ = self.tx.send(event);
        }
    }
}
