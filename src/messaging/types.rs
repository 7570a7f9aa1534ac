//! Messaging data model: endpoints, requests, responses, handler traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::{HandlerResult, ServiceFault};

/// Address a handler is registered under: a (provider, method) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub provider: String,
    pub method: String,
}

impl ServiceEndpoint {
    pub fn new(provider: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider, self.method)
    }
}

/// Terminal status of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Failure,
    Timeout,
    NotFound,
    InternalError,
}

impl ResponseStatus {
    /// Statuses other than `Success` count as dispatch errors in statistics,
    /// except `Timeout` which has its own counter.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseStatus::Failure | ResponseStatus::NotFound | ResponseStatus::InternalError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::Failure => "failure",
            ResponseStatus::Timeout => "timeout",
            ResponseStatus::NotFound => "not_found",
            ResponseStatus::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One dispatch attempt against a registered service.
///
/// A fresh `Request` (with a fresh id) is created for every attempt; retried
/// steps never reuse an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            receiver: receiver.into(),
            method: method.into(),
            params: Map::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint this request targets.
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint::new(self.receiver.clone(), self.method.clone())
    }

    /// Assign a generated id when the caller left it blank.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
    }
}

/// The outcome of exactly one [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub message: String,
}

impl Response {
    pub fn success(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Success,
            payload,
            message: String::new(),
        }
    }

    pub fn failure(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Failure,
            payload: Value::Null,
            message: message.into(),
        }
    }

    pub fn timeout(request_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Timeout,
            payload: Value::Null,
            message: format!("request timed out after {}ms", timeout.as_millis()),
        }
    }

    pub fn not_found(request_id: impl Into<String>, endpoint: &ServiceEndpoint) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::NotFound,
            payload: Value::Null,
            message: format!("no handler registered for {endpoint}"),
        }
    }

    pub fn internal_error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::InternalError,
            payload: Value::Null,
            message: message.into(),
        }
    }

    /// Convert a handler outcome into a response.
    pub fn from_handler_result(request_id: impl Into<String>, result: HandlerResult) -> Self {
        match result {
            Ok(payload) => Response::success(request_id, payload),
            Err(ServiceFault::Failure(message)) => Response::failure(request_id, message),
            Err(ServiceFault::Internal(message)) => Response::internal_error(request_id, message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Synchronous service handler, invoked inline on the caller's task.
pub trait ServiceHandler: Send + Sync {
    fn handle(&self, request: &Request) -> HandlerResult;
}

impl<F> ServiceHandler for F
where
    F: Fn(&Request) -> HandlerResult + Send + Sync,
{
    fn handle(&self, request: &Request) -> HandlerResult {
        self(request)
    }
}

/// Asynchronous service handler, invoked on its own task by the dispatcher.
#[async_trait]
pub trait AsyncServiceHandler: Send + Sync {
    async fn handle(&self, request: Request) -> HandlerResult;
}

/// Adapter turning a future-returning closure into an
/// [`AsyncServiceHandler`], so tests and simple plugins can register plain
/// closures.
pub struct FnAsyncHandler<F>(pub F);

#[async_trait]
impl<F, Fut> AsyncServiceHandler for FnAsyncHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, request: Request) -> HandlerResult {
        (self.0)(request).await
    }
}
