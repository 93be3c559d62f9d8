//! Connection settings for the target service

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the service lives and how to talk to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL, e.g. `http://localhost:8000/api/v1`
    pub base_url: String,

    /// Default per-request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Idle connections kept per host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pool_max_idle() -> usize {
    100
}

impl TargetConfig {
    /// Settings with defaults for everything but the URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }

    /// Set the default request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the idle pool size
    pub fn with_pool_max_idle_per_host(mut self, n: usize) -> Self {
        self.pool_max_idle_per_host = n;
        self
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::new("http://localhost:8000/api/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: TargetConfig =
            serde_json::from_str(r#"{"base_url": "http://shop:8080"}"#).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.pool_max_idle_per_host, 100);

        let config: TargetConfig =
            serde_json::from_str(r#"{"base_url": "http://shop", "request_timeout": "5s"}"#)
                .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
