//! Configuration for attestation nodes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default role token carried by a network operator's membership
pub const DEFAULT_OPERATOR_ROLE: &str = "Network Operator";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Rule engine constants
    pub rules: RulesConfig,

    /// Timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/attest"),
            service_name: "attest-node".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            rules: RulesConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Bloom filter bits per key on the index column family
    pub index_bloom_bits: f64,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            index_bloom_bits: 10.0,
            enable_statistics: false,
        }
    }
}

/// Constants the rule engine is parameterised with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Role token a network operator's membership must carry
    pub network_operator_role: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            network_operator_role: DEFAULT_OPERATOR_ROLE.to_string(),
        }
    }
}

/// Timeouts (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Local or remote query and resolve operations
    pub query_timeout_ms: u64,

    /// Waiting for a peer's reply
    pub peer_timeout_ms: u64,

    /// Waiting for the notary
    pub notary_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            peer_timeout_ms: 30_000,
            notary_timeout_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    /// Query timeout
    pub fn query(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Peer timeout
    pub fn peer(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Notary timeout
    pub fn notary(&self) -> Duration {
        Duration::from_millis(self.notary_timeout_ms)
    }
}

fn env_millis(name: &str) -> crate::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ATTEST_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(name) = std::env::var("ATTEST_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(role) = std::env::var("ATTEST_OPERATOR_ROLE") {
            config.rules.network_operator_role = role;
        }

        if let Some(ms) = env_millis("ATTEST_QUERY_TIMEOUT_MS")? {
            config.timeouts.query_timeout_ms = ms;
        }

        if let Some(ms) = env_millis("ATTEST_PEER_TIMEOUT_MS")? {
            config.timeouts.peer_timeout_ms = ms;
        }

        if let Some(ms) = env_millis("ATTEST_NOTARY_TIMEOUT_MS")? {
            config.timeouts.notary_timeout_ms = ms;
        }

        Ok(config)
    }

    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "attest-node");
        assert_eq!(config.rules.network_operator_role, "Network Operator");
        assert_eq!(config.timeouts.peer(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            service_name = "bank-a"

            [rules]
            network_operator_role = "BNO"

            [timeouts]
            peer_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.service_name, "bank-a");
        assert_eq!(config.rules.network_operator_role, "BNO");
        assert_eq!(config.timeouts.peer_timeout_ms, 250);
        assert_eq!(config.timeouts.query_timeout_ms, 5_000);
        assert_eq!(config.rocksdb.max_background_jobs, 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attest.toml");
        std::fs::write(&path, "data_dir = \"/tmp/attest-test\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/attest-test"));

        std::fs::write(&path, "data_dir = 12").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }
}
