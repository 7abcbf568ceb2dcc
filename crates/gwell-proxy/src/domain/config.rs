//! Proxy configuration types.
//!
//! [`ProxyConfig`] is the single source of truth for runtime settings.  It is
//! built once in `main` (defaults, then the optional TOML file, then CLI/env
//! overrides) and shared with every device task behind an `Arc`.

use std::time::Duration;

/// Default base URL of the account service.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// All runtime configuration for the proxy.
///
/// # Example
///
/// ```rust
/// use gwell_proxy::domain::ProxyConfig;
///
/// let cfg = ProxyConfig::default();
/// assert_eq!(cfg.api_base_url, "http://localhost:8080");
/// assert!(cfg.rendezvous.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Base URL of the account service that lists cameras and issues tokens.
    pub api_base_url: String,

    /// Rendezvous endpoints as `host:port` strings.  Resolved on every
    /// discovery so DNS changes are picked up between attempts.
    pub rendezvous: Vec<String>,

    /// Window in which server-list replies are collected.
    pub discovery_timeout: Duration,

    /// Interval at which unanswered server-list requests are re-sent.
    pub probe_interval: Duration,

    /// How long to wait for candidates to answer their quality probe.
    pub candidate_probe_timeout: Duration,

    /// Upper bound for the secure channel and signaling phases.
    pub phase_timeout: Duration,

    /// How many times a failed device orchestration is restarted.
    pub max_restarts: u32,

    /// Delay before the first restart; doubles on each further restart.
    pub restart_backoff: Duration,

    /// Cap for the restart delay.
    pub restart_backoff_max: Duration,

    /// How long to wait for the account service to report healthy.
    pub api_ready_timeout: Duration,
}

impl ProxyConfig {
    /// Upper bound on one discovery call, including candidate probing.
    pub fn discovery_budget(&self) -> Duration {
        self.discovery_timeout + self.candidate_probe_timeout
    }
}

impl Default for ProxyConfig {
    /// | Field                   | Default                 |
    /// |-------------------------|-------------------------|
    /// | api_base_url            | `http://localhost:8080` |
    /// | rendezvous              | none                    |
    /// | discovery_timeout       | 3 s                     |
    /// | probe_interval          | 500 ms                  |
    /// | candidate_probe_timeout | 1 s                     |
    /// | phase_timeout           | 15 s                    |
    /// | max_restarts            | 3                       |
    /// | restart_backoff         | 2 s                     |
    /// | restart_backoff_max     | 60 s                    |
    /// | api_ready_timeout       | 60 s                    |
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            rendezvous: Vec::new(),
            discovery_timeout: Duration::from_millis(3000),
            probe_interval: Duration::from_millis(500),
            candidate_probe_timeout: Duration::from_millis(1000),
            phase_timeout: Duration::from_secs(15),
            max_restarts: 3,
            restart_backoff: Duration::from_millis(2000),
            restart_backoff_max: Duration::from_secs(60),
            api_ready_timeout: Duration::from_secs(60),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_api_url_is_local_account_service() {
        // Arrange / Act
        let cfg = ProxyConfig::default();
        // Assert
        assert_eq!(cfg.api_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_default_has_no_rendezvous_endpoints() {
        let cfg = ProxyConfig::default();
        assert!(cfg.rendezvous.is_empty());
    }

    #[test]
    fn test_default_discovery_timings() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.discovery_timeout, Duration::from_secs(3));
        assert_eq!(cfg.probe_interval, Duration::from_millis(500));
        assert_eq!(cfg.candidate_probe_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_default_restart_policy() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.max_restarts, 3);
        assert_eq!(cfg.restart_backoff, Duration::from_secs(2));
        assert_eq!(cfg.restart_backoff_max, Duration::from_secs(60));
    }

    #[test]
    fn test_discovery_budget_includes_candidate_probing() {
        let cfg = ProxyConfig {
            discovery_timeout: Duration::from_millis(300),
            candidate_probe_timeout: Duration::from_millis(200),
            ..ProxyConfig::default()
        };
        assert_eq!(cfg.discovery_budget(), Duration::from_millis(500));
    }
}
