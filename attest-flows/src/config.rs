//! Configuration for attestation flows

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log output format for binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

/// Flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Ask counterparties to verify memberships before signing relationships
    pub check_membership: bool,

    /// How long a session waits for the counterparty's next message
    pub session_timeout_ms: u64,

    /// Buffered messages per session direction
    pub channel_capacity: usize,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            check_membership: false,
            session_timeout_ms: 30_000,
            channel_capacity: 16,
            log_format: LogFormat::Pretty,
        }
    }
}

impl FlowConfig {
    /// Session timeout as a duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlowConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = FlowConfig::default();

        if let Ok(value) = std::env::var("ATTEST_CHECK_MEMBERSHIP") {
            config.check_membership = value
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid ATTEST_CHECK_MEMBERSHIP: {}", e)))?;
        }

        if let Ok(value) = std::env::var("ATTEST_SESSION_TIMEOUT_MS") {
            config.session_timeout_ms = value.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid ATTEST_SESSION_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(value) = std::env::var("ATTEST_LOG_FORMAT") {
            config.log_format = match value.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Invalid ATTEST_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }
}
