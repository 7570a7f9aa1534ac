//! Request dispatcher: pending-request bookkeeping, timeouts, resolution.
//!
//! Every asynchronous request gets a [`PendingRequest`] record keyed by
//! request id. Removal from the pending map is the single point of truth for
//! resolution: whichever of {handler completion, watchdog, shutdown} removes
//! the record first delivers the response, and later arrivals find the record
//! gone and are discarded.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::registry::ServiceRegistry;
use super::stats::{DispatcherStats, MessagingStats};
use super::types::{Request, Response};

/// Transient record for one in-flight asynchronous request.
struct PendingRequest {
    reply: oneshot::Sender<Response>,
    watchdog: Option<AbortHandle>,
    created_at: chrono::DateTime<chrono::Utc>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

/// Dispatches requests to registered handlers with timeout enforcement.
pub struct RequestDispatcher {
    registry: Arc<ServiceRegistry>,
    pending: PendingMap,
    stats: Arc<DispatcherStats>,
}

impl RequestDispatcher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(DispatcherStats::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Synchronous dispatch: the handler runs inline on the caller and no
    /// timeout applies. A missing handler yields `NotFound` without creating
    /// any transient state. A panicking handler is caught and reported as an
    /// `InternalError` response, never as a panic on the caller.
    pub fn send_request(&self, request: &Request) -> Response {
        self.stats.record_sent(&request.method);
        let response = match self.registry.lookup_sync(&request.receiver, &request.method) {
            Some(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
                    Ok(result) => Response::from_handler_result(&request.id, result),
                    Err(_) => {
                        warn!(request_id = %request.id, method = %request.method, "sync handler panicked");
                        Response::internal_error(&request.id, "handler panicked")
                    }
                }
            }
            None => Response::not_found(&request.id, &request.endpoint()),
        };
        self.stats.record_status(response.status);
        response
    }

    /// Asynchronous dispatch: suspends the caller until the handler responds,
    /// the watchdog fires, or the dispatcher shuts down — whichever removes
    /// the pending record first.
    pub async fn send_request_async(&self, mut request: Request) -> Response {
        request.ensure_id();
        self.stats.record_sent(&request.method);

        let Some(handler) = self
            .registry
            .lookup_async(&request.receiver, &request.method)
        else {
            let response = Response::not_found(&request.id, &request.endpoint());
            self.stats.record_status(response.status);
            return response;
        };

        let request_id = request.id.clone();
        let timeout = request.timeout;
        let (reply_tx, reply_rx) = oneshot::channel();

        // Insert before arming the watchdog so a zero-length timeout cannot
        // fire against a record that does not exist yet.
        self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                reply: reply_tx,
                watchdog: None,
                created_at: chrono::Utc::now(),
            },
        );

        let watchdog = {
            let pending = Arc::clone(&self.pending);
            let stats = Arc::clone(&self.stats);
            let request_id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(record) = pending.lock().remove(&request_id) {
                    debug!(request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "request timed out");
                    let response = Response::timeout(&request_id, timeout);
                    stats.record_status(response.status);
                    let _ = record.reply.send(response);
                }
            })
        };
        if let Some(record) = self.pending.lock().get_mut(&request_id) {
            record.watchdog = Some(watchdog.abort_handle());
        } else {
            // Watchdog already resolved the request; nothing left to arm.
            watchdog.abort();
        }

        // Run the handler on its own task so a panic is contained as a join
        // error instead of crossing the Request/Response boundary.
        {
            let pending = Arc::clone(&self.pending);
            let stats = Arc::clone(&self.stats);
            let request_id = request_id.clone();
            tokio::spawn(async move {
                let handler_task =
                    tokio::spawn(async move { handler.handle(request).await });
                let response = match handler_task.await {
                    Ok(result) => Response::from_handler_result(&request_id, result),
                    Err(join_error) => {
                        warn!(request_id = %request_id, error = %join_error, "handler task failed");
                        Response::internal_error(
                            &request_id,
                            format!("handler task failed: {join_error}"),
                        )
                    }
                };
                match pending.lock().remove(&request_id) {
                    Some(record) => {
                        if let Some(watchdog) = record.watchdog {
                            watchdog.abort();
                        }
                        stats.record_status(response.status);
                        let _ = record.reply.send(response);
                    }
                    None => {
                        // Timeout or shutdown won the race; discard.
                        debug!(request_id = %request_id, "late handler result discarded");
                    }
                }
            });
        }

        match reply_rx.await {
            Ok(response) => response,
            // Only reachable if the dispatcher is dropped mid-flight.
            Err(_) => Response::internal_error(&request_id, "pending request dropped"),
        }
    }

    /// Resolve every in-flight request with an `InternalError` response and
    /// return how many were flushed. The dispatcher remains usable
    /// afterwards.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(count = drained.len(), "resolving in-flight requests on shutdown");
        }
        let count = drained.len();
        for (request_id, record) in drained {
            if let Some(watchdog) = record.watchdog {
                watchdog.abort();
            }
            let response = Response::internal_error(&request_id, "dispatcher shut down");
            self.stats.record_status(response.status);
            let _ = record.reply.send(response);
        }
        count
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Age of the oldest in-flight request, if any.
    pub fn oldest_pending_age(&self) -> Option<chrono::Duration> {
        let now = chrono::Utc::now();
        self.pending
            .lock()
            .values()
            .map(|record| now - record.created_at)
            .max()
    }

    pub fn get_statistics(&self) -> MessagingStats {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}
