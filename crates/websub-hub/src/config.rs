//! Configuration for the hub.
//!
//! Loaded from an optional TOML file; every field has a default so the hub
//! runs with no configuration at all (in-memory store, localhost listener).
//! CLI flags override file values in `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default lease length when the subscriber does not request one.
/// Ten days - a good default per the WebSub spec's guidance.
pub const DEFAULT_LEASE_SECONDS: u64 = 864_000;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file. Absent means the ephemeral in-memory
    /// store: nothing survives a restart.
    pub path: Option<PathBuf>,
}

/// Lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Applied when a subscribe request carries no hub.lease_seconds
    pub default_seconds: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_seconds: DEFAULT_LEASE_SECONDS,
        }
    }
}

/// Verification-of-intent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Timeout for the outbound challenge GET. Expiry counts as a denial.
    pub timeout_seconds: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the HTTP server binds to
    pub listen: SocketAddr,
    /// Topic URLs seeded into the registry at startup. Topics are
    /// provisioned here, never by the subscription protocol.
    pub topics: Vec<String>,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Lease configuration
    pub lease: LeaseConfig,
    /// Verification configuration
    pub verification: VerificationConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            topics: Vec::new(),
            database: DatabaseConfig::default(),
            lease: LeaseConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl HubConfig {
    /// Load configuration from a TOML file, or defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                let config: HubConfig = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?;
                tracing::info!("Loaded configuration from {:?}", path);
                Ok(config)
            }
            None => {
                tracing::info!("No config file given, using defaults");
                Ok(HubConfig::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.listen, SocketAddr::from(([127, 0, 0, 1], 8000)));
        assert!(config.topics.is_empty());
        assert!(config.database.path.is_none());
        assert_eq!(config.lease.default_seconds, 864_000);
        assert_eq!(config.verification.timeout_seconds, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:9000"
            topics = ["http://example.org/feed"]

            [database]
            path = "hub.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, SocketAddr::from(([0, 0, 0, 0], 9000)));
        assert_eq!(config.topics, vec!["http://example.org/feed"]);
        assert_eq!(config.database.path.as_deref(), Some(Path::new("hub.db")));
        // Unspecified sections fall back to defaults
        assert_eq!(config.lease.default_seconds, 864_000);
        assert_eq!(config.verification.timeout_seconds, 10);
    }
}
