//! Per-device connection state machine.
//!
//! [`DeviceConnection::run`] drives one attempt for one device through
//! `Discovering → Selecting → NegotiatingSecureChannel → Signaling →
//! Streaming` and ends it in `Terminated` or `Failed`.  Each phase is tried
//! once; retrying is the supervisor's job and always starts a fresh
//! [`ConnectionState`].
//!
//! # Architecture
//!
//! The state machine depends only on the [`ServerDiscovery`] and
//! [`SessionPhases`] traits.  Infrastructure implementations are injected at
//! construction time, so every transition is unit-testable without sockets.

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use gwell_core::{
    select_best, AccessCredential, CandidateServer, ConnectionPhase, ConnectionState, Device,
    DeviceId, PhaseFailure, SelectionError, TransitionError,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::application::errors::{DiscoveryError, OrchestrationError, PhaseError};
use crate::domain::config::ProxyConfig;
use crate::domain::events::{DeviceEvent, DeviceReport};

/// Slack added on top of the discovery client's own bound.
const DISCOVERY_GRACE: Duration = Duration::from_millis(500);

/// How often long-running waits check the shutdown flag.
pub(crate) const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Asks the rendezvous service which relay servers can broker a session.
///
/// The device id is only used to tag logs and reports; the probe content
/// does not depend on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServerDiscovery: Send + Sync {
    async fn discover_servers(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<CandidateServer>, DiscoveryError>;
}

/// Everything the session phases need about the attempt.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub device: Device,
    pub credential: AccessCredential,
    pub server: CandidateServer,
}

/// The phases after selection.  Their wire protocol lives behind this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionPhases: Send + Sync {
    /// Sets up the secure channel to the chosen relay.
    async fn negotiate_secure_channel(&self, ctx: &SessionContext) -> Result<(), PhaseError>;

    /// Performs call setup with the device through the relay.
    async fn signal(&self, ctx: &SessionContext) -> Result<(), PhaseError>;

    /// Runs the media session.  Returns `Ok` when it ends cleanly.
    async fn stream(&self, ctx: &SessionContext) -> Result<(), PhaseError>;
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Upper bounds for the bounded phases.  Streaming is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub discovery: Duration,
    pub phase: Duration,
}

impl PhaseTimeouts {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            discovery: config.discovery_budget() + DISCOVERY_GRACE,
            phase: config.phase_timeout,
        }
    }
}

/// How one attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The stream ended cleanly and the state is `Terminated`.
    Completed(ConnectionState),
    /// The state is `Failed`.
    Failed {
        state: ConnectionState,
        failure: PhaseFailure,
        retryable: bool,
    },
    /// Shutdown interrupted the attempt; the state is `Terminated`.
    Cancelled(ConnectionState),
}

impl AttemptOutcome {
    pub fn state(&self) -> &ConnectionState {
        match self {
            Self::Completed(state) | Self::Cancelled(state) => state,
            Self::Failed { state, .. } => state,
        }
    }
}

/// Why [`DeviceConnection::drive`] stopped early.
enum Stop {
    Failed(OrchestrationError),
    Rejected(TransitionError),
    Cancelled,
}

impl From<OrchestrationError> for Stop {
    fn from(e: OrchestrationError) -> Self {
        Self::Failed(e)
    }
}

impl From<TransitionError> for Stop {
    fn from(e: TransitionError) -> Self {
        Self::Rejected(e)
    }
}

enum Guarded<T> {
    Done(T),
    TimedOut(Duration),
    Cancelled,
}

// ── State machine ─────────────────────────────────────────────────────────────

/// Runs connection attempts for one device at a time.
///
/// Holds no per-device state, so one instance can be shared by every device
/// task; each [`run`](Self::run) call owns its own [`ConnectionState`].
pub struct DeviceConnection {
    discovery: Arc<dyn ServerDiscovery>,
    phases: Arc<dyn SessionPhases>,
    timeouts: PhaseTimeouts,
    running: Arc<AtomicBool>,
    reports: mpsc::Sender<DeviceReport>,
}

impl DeviceConnection {
    pub fn new(
        discovery: Arc<dyn ServerDiscovery>,
        phases: Arc<dyn SessionPhases>,
        timeouts: PhaseTimeouts,
        running: Arc<AtomicBool>,
        reports: mpsc::Sender<DeviceReport>,
    ) -> Self {
        Self {
            discovery,
            phases,
            timeouts,
            running,
            reports,
        }
    }

    /// Runs attempt number `attempt` for `device` and reports every transition.
    pub async fn run(
        &self,
        device: &Device,
        credential: &AccessCredential,
        attempt: u32,
    ) -> AttemptOutcome {
        let mut state = ConnectionState::new(device.id.clone(), attempt);
        info!(
            attempt,
            attempt_id = %state.attempt_id(),
            access_id = %credential.access_id,
            token = %credential.redacted_token(),
            "starting connection attempt"
        );
        self.report(&state, DeviceEvent::Entered(ConnectionPhase::Discovering))
            .await;

        match self.drive(&mut state, device, credential).await {
            Ok(()) => AttemptOutcome::Completed(state),
            Err(Stop::Cancelled) => {
                if state.terminate().is_ok() {
                    info!(phase_count = state.transitions(), "attempt cancelled by shutdown");
                    self.report(&state, DeviceEvent::Entered(ConnectionPhase::Terminated))
                        .await;
                }
                AttemptOutcome::Cancelled(state)
            }
            Err(Stop::Failed(e)) => {
                let retryable = e.is_retryable();
                self.fail(state, e.to_string(), retryable).await
            }
            Err(Stop::Rejected(e)) => {
                error!(error = %e, "connection state rejected a transition");
                self.fail(state, e.to_string(), false).await
            }
        }
    }

    async fn drive(
        &self,
        state: &mut ConnectionState,
        device: &Device,
        credential: &AccessCredential,
    ) -> Result<(), Stop> {
        // Discovering
        let guarded = self
            .guard(
                self.discovery.discover_servers(&device.id),
                Some(self.timeouts.discovery),
            )
            .await;
        let candidates = settle(guarded, OrchestrationError::Discovery, |limit| {
            OrchestrationError::Discovery(DiscoveryError::TimedOut(limit))
        })?;
        info!(count = candidates.len(), "discovery complete");
        for candidate in &candidates {
            debug!(%candidate, "candidate server");
        }
        self.enter_next(state).await?;

        // Selecting
        if candidates.is_empty() {
            return Err(OrchestrationError::Selection(SelectionError::NoCandidates).into());
        }
        let server = select_best(&candidates).map_err(OrchestrationError::Selection)?;
        state.record_selection(server.clone())?;
        info!(server = %server, "selected relay server");
        self.report(state, DeviceEvent::ServerSelected(server.clone()))
            .await;
        self.enter_next(state).await?;

        let ctx = SessionContext {
            device: device.clone(),
            credential: credential.clone(),
            server,
        };

        // NegotiatingSecureChannel
        let guarded = self
            .guard(
                self.phases.negotiate_secure_channel(&ctx),
                Some(self.timeouts.phase),
            )
            .await;
        settle(guarded, OrchestrationError::SecureChannel, |limit| {
            OrchestrationError::SecureChannel(PhaseError::TimedOut(limit))
        })?;
        self.enter_next(state).await?;

        // Signaling
        let guarded = self
            .guard(self.phases.signal(&ctx), Some(self.timeouts.phase))
            .await;
        settle(guarded, OrchestrationError::Signaling, |limit| {
            OrchestrationError::Signaling(PhaseError::TimedOut(limit))
        })?;
        self.enter_next(state).await?;

        // Streaming
        info!(server = %ctx.server.address, "streaming");
        let guarded = self.guard(self.phases.stream(&ctx), None).await;
        settle(guarded, OrchestrationError::Stream, |limit| {
            OrchestrationError::Stream(PhaseError::TimedOut(limit))
        })?;
        self.enter_next(state).await?;
        info!("stream ended");
        Ok(())
    }

    /// Runs `fut` with an optional time limit, giving up early on shutdown.
    async fn guard<F: Future>(&self, fut: F, limit: Option<Duration>) -> Guarded<F::Output> {
        let bounded = async {
            match limit {
                Some(limit) => match timeout(limit, fut).await {
                    Ok(output) => Guarded::Done(output),
                    Err(_) => Guarded::TimedOut(limit),
                },
                None => Guarded::Done(fut.await),
            }
        };

        tokio::select! {
            outcome = bounded => outcome,
            () = shutdown_requested(&self.running) => Guarded::Cancelled,
        }
    }

    async fn enter_next(&self, state: &mut ConnectionState) -> Result<(), TransitionError> {
        let phase = state.advance()?;
        debug!(%phase, "phase entered");
        self.report(state, DeviceEvent::Entered(phase)).await;
        Ok(())
    }

    async fn fail(&self, mut state: ConnectionState, cause: String, retryable: bool) -> AttemptOutcome {
        let failure = match state.fail(cause) {
            Ok(failure) => failure.clone(),
            Err(e) => {
                error!(error = %e, "attempt already ended");
                return match state.last_failure().cloned() {
                    Some(failure) => AttemptOutcome::Failed {
                        state,
                        failure,
                        retryable: false,
                    },
                    None => AttemptOutcome::Completed(state),
                };
            }
        };

        warn!(
            phase = %failure.phase,
            kind = %failure.kind,
            cause = %failure.cause,
            "connection attempt failed"
        );
        self.report(&state, DeviceEvent::Failed(failure.clone()))
            .await;
        AttemptOutcome::Failed {
            state,
            failure,
            retryable,
        }
    }

    async fn report(&self, state: &ConnectionState, event: DeviceEvent) {
        let report = DeviceReport {
            device_id: state.device_id().clone(),
            attempt: state.attempt(),
            event,
        };
        if self.reports.send(report).await.is_err() {
            debug!("report receiver dropped");
        }
    }
}

/// Maps a guarded phase result onto the orchestration taxonomy.
fn settle<T, E>(
    guarded: Guarded<Result<T, E>>,
    wrap: fn(E) -> OrchestrationError,
    timed_out: fn(Duration) -> OrchestrationError,
) -> Result<T, Stop> {
    match guarded {
        Guarded::Done(Ok(value)) => Ok(value),
        Guarded::Done(Err(e)) => Err(Stop::Failed(wrap(e))),
        Guarded::TimedOut(limit) => Err(Stop::Failed(timed_out(limit))),
        Guarded::Cancelled => Err(Stop::Cancelled),
    }
}

/// Resolves once `running` has been cleared.
pub async fn shutdown_requested(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
