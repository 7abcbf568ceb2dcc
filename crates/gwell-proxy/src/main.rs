//! gwell-proxy entry point.
//!
//! Wires the infrastructure adapters into the [`Supervisor`] and runs one
//! orchestration per camera on the account.
//!
//! # What happens at startup
//!
//! 1. `tracing_subscriber` is initialised; `RUST_LOG` overrides the `info`
//!    default.
//! 2. CLI arguments (with environment fallbacks) are parsed and merged over
//!    the optional TOML file into a validated [`ProxyConfig`].
//! 3. A Ctrl+C handler clears the shared `running` flag.
//! 4. The account service is polled until healthy.
//! 5. The roster is fetched and every device is launched in its own task.
//!    Failing to fetch the roster is fatal.
//! 6. Once every device has ended the proxy logs the summary and idles until
//!    shutdown.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gwell_proxy::application::{shutdown_requested, Supervisor};
use gwell_proxy::domain::{DeviceEvent, DeviceReport, ProxyConfig};
use gwell_proxy::infrastructure::account_api::HttpAccountApi;
use gwell_proxy::infrastructure::config_file::{load_file_config, validate};
use gwell_proxy::infrastructure::network::UdpDiscoveryClient;
use gwell_proxy::infrastructure::session_phases::DeferredSessionPhases;

/// Capacity of the device report channel.
const REPORT_CHANNEL_CAPACITY: usize = 256;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Per-device P2P connection orchestrator for NAT-bound cameras.
///
/// Every option is optional: unset options fall back to the config file,
/// then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "gwell-proxy",
    about = "Discovers relay servers and drives one connection orchestration per camera",
    version
)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(long, env = "GWELL_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the account service.
    #[arg(long, env = "CRYZE_API_URL")]
    api_url: Option<String>,

    /// Rendezvous endpoint as `host:port`.  Repeat the flag or pass a comma
    /// separated list.
    #[arg(long, env = "GWELL_RENDEZVOUS", value_delimiter = ',')]
    rendezvous: Vec<String>,

    /// Window in which server-list replies are collected.
    #[arg(long, env = "GWELL_DISCOVERY_TIMEOUT_MS")]
    discovery_timeout_ms: Option<u64>,

    /// Interval at which unanswered server-list requests are re-sent.
    #[arg(long, env = "GWELL_PROBE_INTERVAL_MS")]
    probe_interval_ms: Option<u64>,

    /// How long candidates get to answer their quality probe.
    #[arg(long, env = "GWELL_CANDIDATE_PROBE_TIMEOUT_MS")]
    candidate_probe_timeout_ms: Option<u64>,

    /// Upper bound for the secure channel and signaling phases.
    #[arg(long, env = "GWELL_PHASE_TIMEOUT_SECS")]
    phase_timeout_secs: Option<u64>,

    /// How many times a failed device is restarted.
    #[arg(long, env = "GWELL_MAX_RESTARTS")]
    max_restarts: Option<u32>,

    /// Delay before the first restart; doubles for every further restart.
    #[arg(long, env = "GWELL_RESTART_BACKOFF_MS")]
    restart_backoff_ms: Option<u64>,

    /// How long to wait for the account service to become healthy.
    #[arg(long, env = "GWELL_API_READY_TIMEOUT_SECS")]
    api_ready_timeout_secs: Option<u64>,
}

impl Cli {
    /// Merges defaults, the config file, and these arguments into a
    /// validated [`ProxyConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration fails validation.
    fn into_proxy_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = ProxyConfig::default();

        if let Some(path) = &self.config {
            let file = load_file_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            file.apply_to(&mut config);
        }

        if let Some(url) = self.api_url {
            config.api_base_url = url;
        }
        if !self.rendezvous.is_empty() {
            config.rendezvous = self.rendezvous;
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
        if let Some(secs) = self.api_ready_timeout_secs {
            config.api_ready_timeout = Duration::from_secs(secs);
        }

        validate(&config).context("configuration rejected")?;
        Ok(config)
    }
}

/// Waits for the account service to report healthy.
///
/// Returns `Ok(false)` if shutdown was requested first.
async fn wait_for_account_service(
    api: &HttpAccountApi,
    limit: Duration,
    running: &AtomicBool,
) -> anyhow::Result<bool> {
    tokio::select! {
        ready = api.wait_until_ready(limit) => {
            ready.context("account service never became ready")?;
            Ok(true)
        }
        () = shutdown_requested(running) => Ok(false),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_proxy_config()?;
    info!(
        api = %config.api_base_url,
        rendezvous = ?config.rendezvous,
        discovery_timeout_ms = config.discovery_timeout.as_millis() as u64,
        "gwell-proxy starting"
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; stopping device orchestrations");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Account service ────────────────────────────────────────────────────────
    let api = HttpAccountApi::new(&config.api_base_url)
        .context("failed to create account service client")?;
    if !wait_for_account_service(&api, config.api_ready_timeout, &running).await? {
        info!("shutdown requested before the account service became ready");
        return Ok(());
    }

    // ── Report pump ────────────────────────────────────────────────────────────
    let (reports_tx, mut reports_rx) = mpsc::channel::<DeviceReport>(REPORT_CHANNEL_CAPACITY);
    let pump = tokio::spawn(async move {
        while let Some(report) = reports_rx.recv().await {
            match &report.event {
                DeviceEvent::Failed(_) | DeviceEvent::FetchFailed { .. } => warn!(
                    device = %report.device_id,
                    attempt = report.attempt,
                    "{}",
                    report.event
                ),
                _ => info!(
                    device = %report.device_id,
                    attempt = report.attempt,
                    "{}",
                    report.event
                ),
            }
        }
    });

    // ── Orchestration ──────────────────────────────────────────────────────────
    let supervisor = Supervisor::new(
        Arc::new(UdpDiscoveryClient::from_config(&config)),
        Arc::new(DeferredSessionPhases),
        &config,
        Arc::clone(&running),
        reports_tx,
    );
    let summary = supervisor
        .run_roster(Arc::new(api))
        .await
        .context("failed to fetch camera roster")?;

    for (device_id, outcome) in &summary.outcomes {
        info!(device = %device_id, ?outcome, "device finished");
    }

    // Closing the last sender lets the pump drain and exit.
    drop(supervisor);
    if let Err(e) = pump.await {
        error!("report pump ended abnormally: {e}");
    }

    info!("all device orchestrations ended; press Ctrl+C to exit");
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("gwell-proxy stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_without_arguments_leaves_everything_unset() {
        // Arrange / Act
        let cli = Cli::parse_from(["gwell-proxy"]);

        // Assert
        assert!(cli.config.is_none());
        assert!(cli.api_url.is_none());
        assert!(cli.rendezvous.is_empty());
        assert!(cli.max_restarts.is_none());
    }

    #[test]
    fn test_cli_rendezvous_accepts_comma_list_and_repeats() {
        let cli = Cli::parse_from([
            "gwell-proxy",
            "--rendezvous",
            "a.example:51700,b.example:51700",
            "--rendezvous",
            "c.example:51700",
        ]);
        assert_eq!(
            cli.rendezvous,
            vec!["a.example:51700", "b.example:51700", "c.example:51700"]
        );
    }

    #[test]
    fn test_into_proxy_config_requires_rendezvous() {
        let cli = Cli::parse_from(["gwell-proxy"]);
        assert!(cli.into_proxy_config().is_err());
    }

    #[test]
    fn test_into_proxy_config_applies_overrides() {
        // Arrange
        let cli = Cli::parse_from([
            "gwell-proxy",
            "--rendezvous",
            "127.0.0.1:51700",
            "--api-url",
            "http://cryze-api:8080",
            "--discovery-timeout-ms",
            "2000",
            "--max-restarts",
            "5",
        ]);

        // Act
        let config = cli.into_proxy_config().unwrap();

        // Assert
        assert_eq!(config.api_base_url, "http://cryze-api:8080");
        assert_eq!(config.rendezvous, vec!["127.0.0.1:51700"]);
        assert_eq!(config.discovery_timeout, Duration::from_secs(2));
        assert_eq!(config.max_restarts, 5);
        // Untouched values keep their defaults
        assert_eq!(config.phase_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_into_proxy_config_rejects_probe_interval_above_window() {
        let cli = Cli::parse_from([
            "gwell-proxy",
            "--rendezvous",
            "127.0.0.1:51700",
            "--discovery-timeout-ms",
            "200",
            "--probe-interval-ms",
            "500",
        ]);
        assert!(cli.into_proxy_config().is_err());
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("gwell_cli_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gwell.toml");
        std::fs::write(
            &path,
            "rendezvous = [\"10.0.0.1:51700\"]\nmax_restarts = 1\nphase_timeout_secs = 30\n",
        )
        .unwrap();
        let cli = Cli::parse_from([
            "gwell-proxy",
            "--config",
            path.to_str().unwrap(),
            "--max-restarts",
            "7",
        ]);

        // Act
        let config = cli.into_proxy_config().unwrap();

        // Assert
        assert_eq!(config.rendezvous, vec!["10.0.0.1:51700"]);
        assert_eq!(config.max_restarts, 7);
        assert_eq!(config.phase_timeout, Duration::from_secs(30));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_account_wait_yields_to_shutdown() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        // Arrange: the service stays unhealthy and Ctrl+C has been pressed.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let api = HttpAccountApi::new(&server.uri()).unwrap();
        let running = AtomicBool::new(false);

        // Act
        let started = std::time::Instant::now();
        let ready = wait_for_account_service(&api, Duration::from_secs(60), &running)
            .await
            .unwrap();

        // Assert
        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_account_wait_reports_ready_service() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let api = HttpAccountApi::new(&server.uri()).unwrap();
        let running = AtomicBool::new(true);

        let ready = wait_for_account_service(&api, Duration::from_secs(5), &running)
            .await
            .unwrap();

        assert!(ready);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from([
            "gwell-proxy",
            "--config",
            "/nonexistent/gwell.toml",
            "--rendezvous",
            "127.0.0.1:51700",
        ]);
        assert!(cli.into_proxy_config().is_err());
    }
}
