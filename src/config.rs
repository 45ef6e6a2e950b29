//! Configuration for the Floodgate limiter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{Dimension, HeaderMatch};

/// Sentinel lookup key meaning "use the literal remote address".
pub const REMOTE_ADDR_LOOKUP: &str = "RemoteAddr";

/// Configuration for a [`Limiter`](crate::ratelimit::Limiter).
///
/// Supplied at construction and immutable thereafter. `validate` runs as
/// part of limiter construction so a bad rate or window fails at startup,
/// never at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admissions per window; also the reported limit (rounded)
    pub max_per_window: f64,

    /// Rate window in seconds; doubles as the bucket-entry TTL
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Header carrying the client identity, or [`REMOTE_ADDR_LOOKUP`]
    #[serde(default = "default_lookup_key")]
    pub lookup_key: String,

    /// Additional key-sets beyond the base identity. Each entry lists the
    /// dimensions composed with the identity, e.g. `[path]` or
    /// `[method, path]`.
    #[serde(default)]
    pub dimensions: Vec<Vec<Dimension>>,

    /// Upper bound on tracked keys before the oldest entries are evicted
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Request paths exempt from limiting
    #[serde(default)]
    pub skip_paths: Vec<String>,

    /// Header matches exempt from limiting
    #[serde(default)]
    pub skip_headers: Vec<HeaderMatch>,

    /// Message carried by a rejection
    #[serde(default = "default_message")]
    pub message: String,

    /// HTTP-style status carried by a rejection
    #[serde(default = "default_status")]
    pub status: u16,
}

fn default_window_secs() -> u64 {
    60
}

fn default_lookup_key() -> String {
    REMOTE_ADDR_LOOKUP.to_string()
}

fn default_max_keys() -> usize {
    10000
}

fn default_message() -> String {
    "You have reached maximum request limit.".to_string()
}

fn default_status() -> u16 {
    429
}

impl LimiterConfig {
    /// Create a configuration with the given rate and defaults elsewhere.
    pub fn new(max_per_window: f64, window: Duration) -> Self {
        Self {
            max_per_window,
            window_secs: window.as_secs(),
            lookup_key: default_lookup_key(),
            dimensions: Vec::new(),
            max_keys: default_max_keys(),
            skip_paths: Vec::new(),
            skip_headers: Vec::new(),
            message: default_message(),
            status: default_status(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// The rate window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Check the configuration for values that must fail at startup.
    pub fn validate(&self) -> Result<()> {
        if !self.max_per_window.is_finite() || self.max_per_window <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "max_per_window must be a positive finite number, got {}",
                self.max_per_window
            )));
        }
        if self.window_secs == 0 {
            return Err(FloodgateError::Config(
                "window_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_keys == 0 {
            return Err(FloodgateError::Config(
                "max_keys must be greater than zero".to_string(),
            ));
        }
        if self.lookup_key.is_empty() {
            return Err(FloodgateError::Config(
                "lookup_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::new(100.0, Duration::from_secs(60));
        assert_eq!(config.lookup_key, REMOTE_ADDR_LOOKUP);
        assert_eq!(config.max_keys, 10000);
        assert_eq!(config.status, 429);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
max_per_window: 50
window_secs: 10
lookup_key: X-Forwarded-For
dimensions:
  - [path]
  - [method, path]
skip_paths:
  - /healthz
skip_headers:
  - name: X-Internal
    value: "1"
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.max_per_window, 50.0);
        assert_eq!(config.window_secs, 10);
        assert_eq!(config.lookup_key, "X-Forwarded-For");
        assert_eq!(config.dimensions.len(), 2);
        assert_eq!(config.dimensions[1], vec![Dimension::Method, Dimension::Path]);
        assert_eq!(config.skip_paths, vec!["/healthz"]);
        assert_eq!(config.skip_headers[0].name, "X-Internal");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = LimiterConfig::new(0.0, Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan_rate() {
        let config = LimiterConfig::new(f64::NAN, Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = LimiterConfig::new(10.0, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_keys() {
        let mut config = LimiterConfig::new(10.0, Duration::from_secs(1));
        config.max_keys = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LimiterConfig::from_yaml("max_per_window: [not a number]").is_err());
    }
}
