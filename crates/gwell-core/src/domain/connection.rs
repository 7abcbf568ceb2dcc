//! Per-device connection phases and the state record one orchestration owns.
//!
//! # Connection lifecycle
//!
//! ```text
//! Discovering ─► Selecting ─► NegotiatingSecureChannel ─► Signaling ─► Streaming ─► Terminated
//!      │             │                   │                    │            │
//!      └─────────────┴───────────────────┴────────────────────┴────────────┴──► Failed
//! ```
//!
//! - `Discovering`: UDP probes are out to the rendezvous endpoints.
//! - `Selecting`: the candidate set is being ranked; exactly one relay wins.
//! - `NegotiatingSecureChannel`: the secure channel to the chosen relay is
//!   being set up.
//! - `Signaling`: call setup with the device through the relay.
//! - `Streaming`: an active session; stays here until the session ends.
//! - `Failed`: a phase failed; the failure records which one and why.
//! - `Terminated`: the session ended cleanly or the process is shutting down.
//!
//! Each phase is entered at most once per attempt.  A retry is a brand new
//! [`ConnectionState`] with a higher attempt number.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::candidate::CandidateServer;
use crate::domain::device::DeviceId;

/// Current phase of one device orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionPhase {
    Discovering,
    Selecting,
    NegotiatingSecureChannel,
    Signaling,
    Streaming,
    Failed,
    Terminated,
}

impl ConnectionPhase {
    /// `true` for phases no transition may leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }

    /// The phase a successful step moves to, if any.
    pub fn on_success(self) -> Option<Self> {
        match self {
            Self::Discovering => Some(Self::Selecting),
            Self::Selecting => Some(Self::NegotiatingSecureChannel),
            Self::NegotiatingSecureChannel => Some(Self::Signaling),
            Self::Signaling => Some(Self::Streaming),
            Self::Streaming => Some(Self::Terminated),
            Self::Failed | Self::Terminated => None,
        }
    }

    /// The failure kind raised when this phase fails.
    pub fn failure_kind(self) -> Option<FailureKind> {
        match self {
            Self::Discovering => Some(FailureKind::Discovery),
            Self::Selecting => Some(FailureKind::Selection),
            Self::NegotiatingSecureChannel => Some(FailureKind::SecureChannel),
            Self::Signaling => Some(FailureKind::Signaling),
            Self::Streaming => Some(FailureKind::Stream),
            Self::Failed | Self::Terminated => None,
        }
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::Selecting => "selecting",
            Self::NegotiatingSecureChannel => "negotiating-secure-channel",
            Self::Signaling => "signaling",
            Self::Streaming => "streaming",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Error taxonomy for per-device failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Device metadata could not be fetched from the account service.
    DeviceInfoFetch,
    /// The access credential could not be fetched from the account service.
    CredentialFetch,
    /// No rendezvous endpoint responded, or the probe could not be sent.
    Discovery,
    /// The candidate set was empty or invalid.
    Selection,
    SecureChannel,
    Signaling,
    Stream,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DeviceInfoFetch => "DeviceInfoFetchError",
            Self::CredentialFetch => "CredentialFetchError",
            Self::Discovery => "DiscoveryError",
            Self::Selection => "SelectionError",
            Self::SecureChannel => "SecureChannelError",
            Self::Signaling => "SignalingError",
            Self::Stream => "StreamError",
        };
        f.write_str(name)
    }
}

/// The phase an orchestration failed in, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseFailure {
    pub phase: ConnectionPhase,
    pub kind: FailureKind,
    pub cause: String,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}: {}", self.kind, self.phase, self.cause)
    }
}

/// Rejected state changes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("orchestration already ended in {0}")]
    AlreadyTerminal(ConnectionPhase),
    #[error("a server can only be recorded while selecting (current phase: {0})")]
    NotSelecting(ConnectionPhase),
    #[error("a server was already selected for this attempt")]
    ServerAlreadySelected,
}

/// Mutable record of one device orchestration attempt.
///
/// Owned exclusively by the task driving that device; nothing else holds a
/// reference to it.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    device_id: DeviceId,
    attempt_id: Uuid,
    attempt: u32,
    phase: ConnectionPhase,
    last_failure: Option<PhaseFailure>,
    chosen_server: Option<CandidateServer>,
    transitions: u32,
}

impl ConnectionState {
    /// Creates the state for attempt number `attempt` (1-based), starting in
    /// `Discovering`.
    pub fn new(device_id: DeviceId, attempt: u32) -> Self {
        Self {
            device_id,
            attempt_id: Uuid::new_v4(),
            attempt,
            phase: ConnectionPhase::Discovering,
            last_failure: None,
            chosen_server: None,
            transitions: 0,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Unique id of this attempt, for correlating log lines across restarts.
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn last_failure(&self) -> Option<&PhaseFailure> {
        self.last_failure.as_ref()
    }

    pub fn chosen_server(&self) -> Option<&CandidateServer> {
        self.chosen_server.as_ref()
    }

    /// Number of phase changes performed so far.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Moves to the success successor of the current phase.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AlreadyTerminal`] if the attempt has ended.
    pub fn advance(&mut self) -> Result<ConnectionPhase, TransitionError> {
        let next = self
            .phase
            .on_success()
            .ok_or(TransitionError::AlreadyTerminal(self.phase))?;
        self.phase = next;
        self.transitions += 1;
        Ok(next)
    }

    /// Records the relay chosen by selection.  Allowed once, while selecting.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::NotSelecting`] outside `Selecting` and
    /// [`TransitionError::ServerAlreadySelected`] on a second call.
    pub fn record_selection(&mut self, server: CandidateServer) -> Result<(), TransitionError> {
        if self.phase != ConnectionPhase::Selecting {
            return Err(TransitionError::NotSelecting(self.phase));
        }
        if self.chosen_server.is_some() {
            return Err(TransitionError::ServerAlreadySelected);
        }
        self.chosen_server = Some(server);
        Ok(())
    }

    /// Moves to `Failed`, tagging the failure with the phase it happened in.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AlreadyTerminal`] if the attempt has ended.
    pub fn fail(&mut self, cause: impl Into<String>) -> Result<&PhaseFailure, TransitionError> {
        let kind = self
            .phase
            .failure_kind()
            .ok_or(TransitionError::AlreadyTerminal(self.phase))?;
        let failure = PhaseFailure {
            phase: self.phase,
            kind,
            cause: cause.into(),
        };
        self.phase = ConnectionPhase::Failed;
        self.transitions += 1;
        Ok(self.last_failure.insert(failure))
    }

    /// Moves to `Terminated` from any non-terminal phase (clean end or shutdown).
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AlreadyTerminal`] if the attempt has ended.
    pub fn terminate(&mut self) -> Result<(), TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.phase));
        }
        self.phase = ConnectionPhase::Terminated;
        self.transitions += 1;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
