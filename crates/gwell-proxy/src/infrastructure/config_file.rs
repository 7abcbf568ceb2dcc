//! Optional TOML configuration file.
//!
//! Every key is optional; a missing key keeps whatever value the
//! [`ProxyConfig`] already holds.  `main` layers sources in this order, each
//! overriding the previous one:
//!
//! 1. [`ProxyConfig::default`]
//! 2. the file passed with `--config`
//! 3. command-line flags and their environment variables
//!
//! ```toml
//! api_url = "http://cryze-api:8080"
//! rendezvous = ["p2p1.cloudlinks.cn:51700", "p2p2.cloudlinks.cn:51700"]
//! discovery_timeout_ms = 3000
//! probe_interval_ms = 500
//! candidate_probe_timeout_ms = 1000
//! phase_timeout_secs = 15
//! max_restarts = 3
//! restart_backoff_ms = 2000
//! restart_backoff_max_secs = 60
//! api_ready_timeout_secs = 60
//! ```
//!
//! Unknown keys are rejected so typos do not silently fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::config::ProxyConfig;
use crate::infrastructure::account_api::validate_base_url;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The merged configuration is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk schema.  Durations carry their unit in the key name.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub rendezvous: Option<Vec<String>>,
    pub discovery_timeout_ms: Option<u64>,
    pub probe_interval_ms: Option<u64>,
    pub candidate_probe_timeout_ms: Option<u64>,
    pub phase_timeout_secs: Option<u64>,
    pub max_restarts: Option<u32>,
    pub restart_backoff_ms: Option<u64>,
    pub restart_backoff_max_secs: Option<u64>,
    pub api_ready_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Overwrites every field of `config` that this file sets.
    pub fn apply_to(&self, config: &mut ProxyConfig) {
        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(rendezvous) = &self.rendezvous {
            config.rendezvous = rendezvous.clone();
        }
        if let Some(ms) = self.discovery_timeout_ms {
            config.discovery_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.probe_interval_ms {
            config.probe_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.candidate_probe_timeout_ms {
            config.candidate_probe_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = self.phase_timeout_secs {
            config.phase_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.max_restarts {
            config.max_restarts = n;
        }
        if let Some(ms) = self.restart_backoff_ms {
            config.restart_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = self.restart_backoff_max_secs {
            config.restart_backoff_max = Duration::from_secs(secs);
        }
        if let Some(secs) = self.api_ready_timeout_secs {
            config.api_ready_timeout = Duration::from_secs(secs);
        }
    }
}

/// Reads and parses the file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read (including when it
/// does not exist, since the path was given explicitly) and
/// [`ConfigError::Parse`] for malformed TOML or unknown keys.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Checks a fully merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first problem found.
pub fn validate(config: &ProxyConfig) -> Result<(), ConfigError> {
    if config.rendezvous.iter().all(|endpoint| endpoint.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "at least one rendezvous endpoint is required".to_string(),
        ));
    }
    if config.discovery_timeout.is_zero() {
        return Err(ConfigError::Invalid(
            "discovery timeout must be greater than zero".to_string(),
        ));
    }
    if config.probe_interval > config.discovery_timeout {
        return Err(ConfigError::Invalid(format!(
            "probe interval {:?} exceeds discovery timeout {:?}",
            config.probe_interval, config.discovery_timeout
        )));
    }
    if config.probe_interval.is_zero() {
        return Err(ConfigError::Invalid(
            "probe interval must be greater than zero".to_string(),
        ));
    }
    validate_base_url(&config.api_base_url).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn valid_config() -> ProxyConfig {
        ProxyConfig {
            rendezvous: vec!["127.0.0.1:51700".to_string()],
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn test_empty_file_changes_nothing() {
        // Arrange
        let file: FileConfig = toml::from_str("").unwrap();
        let mut cfg = ProxyConfig::default();

        // Act
        file.apply_to(&mut cfg);

        // Assert
        assert_eq!(cfg, ProxyConfig::default());
    }

    #[test]
    fn test_file_values_override_defaults() {
        // Arrange
        let toml_str = r#"
api_url = "http://cryze-api:8080"
rendezvous = ["a.example:51700", "b.example:51700"]
discovery_timeout_ms = 5000
max_restarts = 0
restart_backoff_max_secs = 30
"#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        let mut cfg = ProxyConfig::default();

        // Act
        file.apply_to(&mut cfg);

        // Assert
        assert_eq!(cfg.api_base_url, "http://cryze-api:8080");
        assert_eq!(cfg.rendezvous.len(), 2);
        assert_eq!(cfg.discovery_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_restarts, 0);
        assert_eq!(cfg.restart_backoff_max, Duration::from_secs(30));
        // Unset keys keep their defaults
        assert_eq!(cfg.probe_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("discovery_timeout = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_returns_io_error() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/gwell.toml");
        let result = load_file_config(&path);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_file_config_reads_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("gwell_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gwell.toml");
        std::fs::write(&path, "phase_timeout_secs = 20\n").unwrap();

        // Act
        let file = load_file_config(&path).unwrap();

        // Assert
        assert_eq!(file.phase_timeout_secs, Some(20));
        assert_eq!(file.api_url, None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_toml_returns_parse_error() {
        let dir = std::env::temp_dir().join(format!("gwell_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gwell.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_file_config(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── validate ──────────────────────────────────────────────────────────────

    #[test]
    fn test_validate_accepts_sensible_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_rendezvous() {
        let cfg = ProxyConfig::default();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_discovery_timeout() {
        let cfg = ProxyConfig {
            discovery_timeout: Duration::ZERO,
            probe_interval: Duration::ZERO,
            ..valid_config()
        };
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("discovery timeout"));
    }

    #[test]
    fn test_validate_rejects_probe_interval_longer_than_window() {
        let cfg = ProxyConfig {
            discovery_timeout: Duration::from_millis(300),
            probe_interval: Duration::from_millis(500),
            ..valid_config()
        };
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unparsable_api_url() {
        let cfg = ProxyConfig {
            api_base_url: "not a url".to_string(),
            ..valid_config()
        };
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }
}
