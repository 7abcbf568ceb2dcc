//! Orchestration supervisor: one independent task per device.
//!
//! The supervisor spawns every device task without waiting for earlier ones,
//! restarts failed devices with exponential backoff, and collects a
//! [`SupervisorSummary`] once every task has ended.  Tasks share nothing
//! mutable; all they emit flows through the report channel.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use gwell_core::{AccessCredential, Device, DeviceId};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::connect_device::{
    shutdown_requested, AttemptOutcome, DeviceConnection, PhaseTimeouts, ServerDiscovery,
    SessionPhases,
};
use crate::application::errors::{AccountApiError, OrchestrationError};
use crate::domain::config::ProxyConfig;
use crate::domain::events::{DeviceEvent, DeviceOutcome, DeviceReport, SupervisorSummary};

/// How long device tasks get to wind down after shutdown before being aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Source of the device roster, device metadata and access credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Lists the ids of every camera on the account.
    async fn list_devices(&self) -> Result<Vec<DeviceId>, AccountApiError>;

    async fn device_info(&self, device_id: &DeviceId) -> Result<Device, AccountApiError>;

    /// Fetches a fresh access credential.  Credentials are single-use.
    async fn access_credential(
        &self,
        device_id: &DeviceId,
    ) -> Result<AccessCredential, AccountApiError>;
}

/// Bounded restart policy with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            initial_backoff: config.restart_backoff,
            max_backoff: config.restart_backoff_max,
        }
    }

    /// Delay before restart number `restart` (1-based): the initial backoff
    /// doubled for every earlier restart, capped at `max_backoff`.
    pub fn delay_for(&self, restart: u32) -> Duration {
        let doublings = restart.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Where a device task gets its metadata and credential from.
enum DeviceSource {
    /// Both were fetched by the caller; every attempt reuses them.
    Prefetched(Device, AccessCredential),
    /// Fetched inside the device task; every attempt gets a new credential.
    Account(DeviceId, Arc<dyn AccountApi>),
}

impl DeviceSource {
    fn device_id(&self) -> &DeviceId {
        match self {
            Self::Prefetched(device, _) => &device.id,
            Self::Account(id, _) => id,
        }
    }
}

/// Launches and watches one orchestration per device.
pub struct Supervisor {
    connection: Arc<DeviceConnection>,
    policy: RestartPolicy,
    running: Arc<AtomicBool>,
    reports: mpsc::Sender<DeviceReport>,
}

impl Supervisor {
    /// Builds a supervisor from its collaborators and the proxy config.
    ///
    /// Clearing `running` stops every device task; each then reports
    /// `Terminated`.
    pub fn new(
        discovery: Arc<dyn ServerDiscovery>,
        phases: Arc<dyn SessionPhases>,
        config: &ProxyConfig,
        running: Arc<AtomicBool>,
        reports: mpsc::Sender<DeviceReport>,
    ) -> Self {
        let connection = DeviceConnection::new(
            discovery,
            phases,
            PhaseTimeouts::from_config(config),
            Arc::clone(&running),
            reports.clone(),
        );
        Self {
            connection: Arc::new(connection),
            policy: RestartPolicy::from_config(config),
            running,
            reports,
        }
    }

    /// Runs one orchestration per pre-fetched `(Device, AccessCredential)`.
    ///
    /// Restarts reuse the supplied credential.
    pub async fn run(&self, devices: Vec<(Device, AccessCredential)>) -> SupervisorSummary {
        let sources = devices
            .into_iter()
            .map(|(device, credential)| DeviceSource::Prefetched(device, credential))
            .collect();
        self.supervise(sources).await
    }

    /// Fetches the roster and runs one orchestration per listed device.
    ///
    /// Metadata and credentials are fetched inside each device's own task,
    /// so one device's fetch failure never affects another.
    ///
    /// # Errors
    ///
    /// Returns the account error if the roster itself cannot be fetched.
    pub async fn run_roster(
        &self,
        api: Arc<dyn AccountApi>,
    ) -> Result<SupervisorSummary, AccountApiError> {
        let roster = api.list_devices().await?;
        info!(count = roster.len(), "fetched camera roster");

        let sources = roster
            .into_iter()
            .map(|id| DeviceSource::Account(id, Arc::clone(&api)))
            .collect();
        Ok(self.supervise(sources).await)
    }

    async fn supervise(&self, sources: Vec<DeviceSource>) -> SupervisorSummary {
        let mut tasks = JoinSet::new();
        let mut task_devices = HashMap::new();

        for source in sources {
            let device_id = source.device_id().clone();
            let span = info_span!("device", id = %device_id);
            let worker = DeviceWorker {
                connection: Arc::clone(&self.connection),
                policy: self.policy,
                running: Arc::clone(&self.running),
                reports: self.reports.clone(),
            };
            let handle = tasks.spawn(worker.run(source).instrument(span));
            task_devices.insert(handle.id(), device_id);
        }
        info!(devices = task_devices.len(), "device orchestrations launched");

        let mut summary = SupervisorSummary::default();
        let drained = tokio::select! {
            () = collect(&mut tasks, &mut task_devices, &mut summary) => true,
            () = shutdown_requested(&self.running) => false,
        };

        if !drained {
            info!("shutdown requested; waiting for device tasks to stop");
            let wind_down = collect(&mut tasks, &mut task_devices, &mut summary);
            if timeout(SHUTDOWN_GRACE, wind_down).await.is_err() {
                warn!(remaining = tasks.len(), "device tasks still running; aborting");
                tasks.abort_all();
                collect(&mut tasks, &mut task_devices, &mut summary).await;
            }
        }

        info!(
            terminated = summary.terminated(),
            failed = summary.failed(),
            cancelled = summary.cancelled(),
            aborted = summary.aborted(),
            "all device orchestrations ended"
        );
        summary
    }
}

/// Drains `tasks`, recording each finished device in `summary`.
async fn collect(
    tasks: &mut JoinSet<(DeviceId, DeviceOutcome)>,
    task_devices: &mut HashMap<tokio::task::Id, DeviceId>,
    summary: &mut SupervisorSummary,
) {
    while let Some(joined) = tasks.join_next_with_id().await {
        let (device_id, outcome) = match joined {
            Ok((task_id, (device_id, outcome))) => {
                task_devices.remove(&task_id);
                (device_id, outcome)
            }
            Err(e) => {
                let Some(device_id) = task_devices.remove(&e.id()) else {
                    error!("unknown device task ended: {e}");
                    continue;
                };
                if e.is_panic() {
                    error!(device = %device_id, "device task panicked");
                }
                (
                    device_id,
                    DeviceOutcome::Aborted {
                        cause: e.to_string(),
                    },
                )
            }
        };
        summary.outcomes.insert(device_id, outcome);
    }
}

/// Everything one device task needs, moved into the task.
struct DeviceWorker {
    connection: Arc<DeviceConnection>,
    policy: RestartPolicy,
    running: Arc<AtomicBool>,
    reports: mpsc::Sender<DeviceReport>,
}

impl DeviceWorker {
    async fn run(self, source: DeviceSource) -> (DeviceId, DeviceOutcome) {
        let device_id = source.device_id().clone();
        let outcome = self.run_attempts(&source).await;
        match &outcome {
            DeviceOutcome::Terminated { attempts } => info!(attempts, "device session ended"),
            DeviceOutcome::Failed {
                attempts,
                kind,
                cause,
            } => warn!(attempts, %kind, %cause, "device orchestration gave up"),
            DeviceOutcome::Cancelled { attempts } => info!(attempts, "device stopped by shutdown"),
            DeviceOutcome::Aborted { cause } => warn!(%cause, "device orchestration aborted"),
        }
        (device_id, outcome)
    }

    async fn run_attempts(&self, source: &DeviceSource) -> DeviceOutcome {
        let mut device: Option<Device> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (kind, cause, retryable) = match self.prepare(source, &mut device).await {
                Err(e) => {
                    warn!(attempt, error = %e, "could not prepare connection attempt");
                    let (kind, cause) = (e.kind(), e.to_string());
                    self.report(
                        source.device_id(),
                        attempt,
                        DeviceEvent::FetchFailed {
                            kind,
                            cause: cause.clone(),
                        },
                    )
                    .await;
                    (kind, cause, e.is_retryable())
                }
                Ok((device, credential)) => {
                    match self.connection.run(&device, &credential, attempt).await {
                        AttemptOutcome::Completed(_) => {
                            return DeviceOutcome::Terminated { attempts: attempt }
                        }
                        AttemptOutcome::Cancelled(_) => {
                            return DeviceOutcome::Cancelled { attempts: attempt }
                        }
                        AttemptOutcome::Failed {
                            failure, retryable, ..
                        } => (failure.kind, failure.cause, retryable),
                    }
                }
            };

            let restarts_done = attempt - 1;
            if !retryable || restarts_done >= self.policy.max_restarts {
                return DeviceOutcome::Failed {
                    attempts: attempt,
                    kind,
                    cause,
                };
            }
            if !self.running.load(Ordering::Relaxed) {
                return DeviceOutcome::Cancelled { attempts: attempt };
            }

            let delay = self.policy.delay_for(restarts_done + 1);
            info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling restart");
            self.report(
                source.device_id(),
                attempt,
                DeviceEvent::RestartScheduled { delay },
            )
            .await;

            tokio::select! {
                () = sleep(delay) => {}
                () = shutdown_requested(&self.running) => {
                    return DeviceOutcome::Cancelled { attempts: attempt };
                }
            }
        }
    }

    /// Returns the device and a credential for the next attempt.
    async fn prepare(
        &self,
        source: &DeviceSource,
        cached: &mut Option<Device>,
    ) -> Result<(Device, AccessCredential), OrchestrationError> {
        match source {
            DeviceSource::Prefetched(device, credential) => Ok((device.clone(), credential.clone())),
            DeviceSource::Account(id, api) => {
                let device = match cached {
                    Some(device) => device.clone(),
                    None => {
                        let device = api
                            .device_info(id)
                            .await
                            .map_err(OrchestrationError::DeviceInfoFetch)?;
                        info!(
                            stream = %device.stream_name_or_default(),
                            lan = device.lan_address.as_deref().unwrap_or("-"),
                            "fetched device info"
                        );
                        cached.insert(device).clone()
                    }
                };
                let credential = api
                    .access_credential(id)
                    .await
                    .map_err(OrchestrationError::CredentialFetch)?;
                info!(
                    access_id = %credential.access_id,
                    token = %credential.redacted_token(),
                    "fetched access credential"
                );
                Ok((device, credential))
            }
        }
    }

    async fn report(&self, device_id: &DeviceId, attempt: u32, event: DeviceEvent) {
        let report = DeviceReport {
            device_id: device_id.clone(),
            attempt,
            event,
        };
        if self.reports.send(report).await.is_err() {
            debug!("report receiver dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
