use thiserror::Error;

/// Errors a service handler may return.
///
/// The dispatcher maps `Failure` to a `Failure` response status and
/// `Internal` to `InternalError`; neither ever escapes the Request/Response
/// boundary as a Rust error.
#[derive(Debug, Error)]
pub enum ServiceFault {
    /// The handler ran but the operation itself failed (business failure).
    #[error("{0}")]
    Failure(String),
    /// The handler hit an unexpected internal problem.
    #[error("{0}")]
    Internal(String),
}

impl ServiceFault {
    pub fn failure(message: impl Into<String>) -> Self {
        ServiceFault::Failure(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceFault::Internal(message.into())
    }
}

impl From<serde_json::Error> for ServiceFault {
    fn from(e: serde_json::Error) -> Self {
        ServiceFault::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        assert_eq!(
            ServiceFault::failure("quota exceeded").to_string(),
            "quota exceeded"
        );
        assert_eq!(ServiceFault::internal("oops").to_string(), "oops");
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let fault: ServiceFault = err.into();
        assert!(matches!(fault, ServiceFault::Internal(_)));
    }
}
