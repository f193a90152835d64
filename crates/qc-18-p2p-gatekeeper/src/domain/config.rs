//! Gatekeeper configuration with validation.
//!
//! Two layers:
//! - [`GatekeeperConfig`]: worker-local settings, loaded from TOML at startup.
//! - [`PolicyConfig`]: admission policy handed out by the coordinator
//!   (`getConfig`), immutable for the life of the worker.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default P2P listen port
pub const DEFAULT_P2P_PORT: u16 = 4002;

/// Frames shorter than this (other than the heartbeat token) are rejected unparsed
pub const DEFAULT_MIN_FRAME_LEN: usize = 10;

/// Default maximum frame size (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum operation name length accepted by the authorization stage
pub const DEFAULT_MAX_OPERATION_LEN: usize = 128;

/// Worker-local gatekeeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Listen address for the peer socket server
    pub bind: SocketAddr,
    /// Minimum length of a non-heartbeat frame
    pub min_frame_len: usize,
    /// Maximum accepted frame size in bytes
    pub max_frame_size: usize,
    /// Minimum spacing between two heartbeats from one connection
    #[serde(with = "humantime_serde")]
    pub heartbeat_min_interval: Duration,
    /// How long a recorded violation keeps an IP penalized
    #[serde(with = "humantime_serde")]
    pub penalty_window: Duration,
    /// Cadence of the full penalty table purge
    #[serde(with = "humantime_serde")]
    pub penalty_purge_interval: Duration,
    /// Maximum operation name length
    pub max_operation_len: usize,
    /// Bounded wait for a single coordinator round trip
    #[serde(with = "humantime_serde")]
    pub coordinator_timeout: Duration,
    /// Cadence of expired pending-request cleanup in the IPC adapter
    #[serde(with = "humantime_serde")]
    pub pending_cleanup_interval: Duration,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_P2P_PORT),
            min_frame_len: DEFAULT_MIN_FRAME_LEN,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            heartbeat_min_interval: Duration::from_secs(1),
            penalty_window: Duration::from_secs(60),
            penalty_purge_interval: Duration::from_secs(60 * 60),
            max_operation_len: DEFAULT_MAX_OPERATION_LEN,
            coordinator_timeout: Duration::from_secs(10),
            pending_cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl GatekeeperConfig {
    /// Parse configuration from a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_frame_len == 0 {
            return Err(ConfigError::InvalidLimit(
                "min_frame_len cannot be 0".into(),
            ));
        }

        if self.max_frame_size < self.min_frame_len {
            return Err(ConfigError::InvalidLimit(format!(
                "max_frame_size {} is below min_frame_len {}",
                self.max_frame_size, self.min_frame_len
            )));
        }

        if self.max_operation_len == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_operation_len cannot be 0".into(),
            ));
        }

        if self.coordinator_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "coordinator_timeout cannot be 0".into(),
            ));
        }

        if self.penalty_purge_interval.is_zero() || self.pending_cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "cleanup intervals cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// Admission policy supplied by the coordinator's `getConfig`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Statically blacklisted peer addresses
    pub blacklist: HashSet<IpAddr>,
    /// Max connections sharing one /24 (0 = unlimited)
    pub max_same_subnet_peers: usize,
}

impl PolicyConfig {
    /// Build from raw blacklist strings. Entries that are not IP addresses are skipped.
    pub fn from_raw<S: AsRef<str>>(blacklist: &[S], max_same_subnet_peers: usize) -> Self {
        let blacklist = blacklist
            .iter()
            .filter_map(|entry| {
                let entry = entry.as_ref().trim();
                match entry.parse::<IpAddr>() {
                    Ok(ip) => Some(ip.to_canonical()),
                    Err(_) => {
                        warn!(entry = entry, "Ignoring unparseable blacklist entry");
                        None
                    }
                }
            })
            .collect();

        Self {
            blacklist,
            max_same_subnet_peers,
        }
    }

    /// Check the static blacklist
    pub fn is_blacklisted(&self, ip: &IpAddr) -> bool {
        self.blacklist.contains(&ip.to_canonical())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("config io error: {0}")]
    Io(String),
    /// Config document is not valid TOML for this schema
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatekeeperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_frame_len, 10);
        assert_eq!(config.max_operation_len, 128);
        assert_eq!(config.penalty_window, Duration::from_secs(60));
        assert_eq!(config.penalty_purge_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_toml_overrides_and_defaults() {
        let config = GatekeeperConfig::from_toml_str(
            r#"
            bind = "127.0.0.1:4102"
            coordinator_timeout = "2s"
            penalty_window = "90s"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind.port(), 4102);
        assert_eq!(config.coordinator_timeout, Duration::from_secs(2));
        assert_eq!(config.penalty_window, Duration::from_secs(90));
        assert_eq!(config.heartbeat_min_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = GatekeeperConfig::from_toml_str("min_frame_len = \"ten\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = GatekeeperConfig::from_toml_str("coordinator_timeout = \"0s\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatekeeper.toml");
        std::fs::write(&path, "max_operation_len = 64\n").unwrap();

        let config = GatekeeperConfig::load(&path).unwrap();
        assert_eq!(config.max_operation_len, 64);

        let missing = GatekeeperConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_policy_blacklist_parsing() {
        let policy = PolicyConfig::from_raw(&["10.0.0.1", "not-an-ip", " 192.168.1.7 "], 5);
        assert_eq!(policy.blacklist.len(), 2);
        assert!(policy.is_blacklisted(&"10.0.0.1".parse().unwrap()));
        assert!(policy.is_blacklisted(&"192.168.1.7".parse().unwrap()));
        assert!(!policy.is_blacklisted(&"10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_policy_blacklist_matches_mapped_ipv6() {
        let policy = PolicyConfig::from_raw(&["10.0.0.1"], 5);
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert!(policy.is_blacklisted(&mapped));
    }
}
