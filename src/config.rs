//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the orchestration engine.
///
/// Step-level settings (timeout, retries, retry delay) fall back to these
/// defaults when a [`WorkflowStep`](crate::workflow::WorkflowStep) leaves
/// them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default request timeout for steps that do not set their own, in
    /// milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Default maximum retry count for steps that do not set their own.
    #[serde(default)]
    pub default_max_retries: u32,
    /// Default delay between retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub default_retry_delay_ms: u64,
    /// Upper bound on concurrently running steps within one parallel
    /// wavefront. `0` means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_timeout_ms: default_timeout_ms(),
            default_max_retries: 0,
            default_retry_delay_ms: default_retry_delay_ms(),
            max_concurrency: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.default_max_retries, 0);
        assert_eq!(config.default_retry_delay_ms, 1_000);
        assert_eq!(config.max_concurrency, 0);
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.max_concurrency, 0);
    }
}
