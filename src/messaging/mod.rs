//! Request/response messaging between plugins.
//!
//! - [`types`] — Requests, responses, endpoints, and handler traits.
//! - [`registry`] — The service registry mapping (provider, method) to handlers.
//! - [`dispatcher`] — In-flight request bookkeeping, timeouts, and resolution.
//! - [`stats`] — Dispatch statistics counters.

pub mod dispatcher;
pub mod registry;
pub mod stats;
pub mod types;

pub use dispatcher::RequestDispatcher;
pub use registry::ServiceRegistry;
pub use stats::MessagingStats;
pub use types::{
    AsyncServiceHandler, FnAsyncHandler, Request, Response, ResponseStatus, ServiceEndpoint,
    ServiceHandler,
};
