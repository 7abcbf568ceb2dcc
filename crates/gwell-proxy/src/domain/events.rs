//! Reports emitted by device tasks and the supervisor's final summary.
//!
//! Device tasks never share mutable state.  Everything an observer learns
//! about a device arrives as a [`DeviceReport`] over an `mpsc` channel.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use gwell_core::{CandidateServer, ConnectionPhase, DeviceId, FailureKind, PhaseFailure};

/// One observable step of one device orchestration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device_id: DeviceId,
    /// 1-based attempt number the event belongs to.
    pub attempt: u32,
    pub event: DeviceEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The attempt entered a new phase.  `Entered(Discovering)` opens every
    /// attempt; `Entered(Terminated)` closes a clean or cancelled one.
    Entered(ConnectionPhase),
    /// Selection picked the relay this attempt will use.
    ServerSelected(CandidateServer),
    /// The attempt moved to `Failed`.
    Failed(PhaseFailure),
    /// Metadata or credential could not be fetched, so the state machine
    /// never started for this attempt.
    FetchFailed { kind: FailureKind, cause: String },
    /// The supervisor will start another attempt after `delay`.
    RestartScheduled { delay: Duration },
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entered(phase) => write!(f, "entered {phase}"),
            Self::ServerSelected(server) => write!(f, "selected {server}"),
            Self::Failed(failure) => write!(f, "failed: {failure}"),
            Self::FetchFailed { kind, cause } => write!(f, "{kind}: {cause}"),
            Self::RestartScheduled { delay } => {
                write!(f, "restart scheduled in {}ms", delay.as_millis())
            }
        }
    }
}

/// How a device's orchestration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// The streaming session ended cleanly.
    Terminated { attempts: u32 },
    /// The last attempt failed and no restart followed.
    Failed {
        attempts: u32,
        kind: FailureKind,
        cause: String,
    },
    /// Shutdown was requested while the device was still running.
    Cancelled { attempts: u32 },
    /// The device task panicked or had to be aborted.
    Aborted { cause: String },
}

impl DeviceOutcome {
    /// Attempts started before the outcome was reached; `0` when unknown.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Terminated { attempts }
            | Self::Failed { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
            Self::Aborted { .. } => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Final outcome of every device a supervisor run was given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorSummary {
    pub outcomes: BTreeMap<DeviceId, DeviceOutcome>,
}

impl SupervisorSummary {
    pub fn outcome(&self, device_id: &DeviceId) -> Option<&DeviceOutcome> {
        self.outcomes.get(device_id)
    }

    pub fn terminated(&self) -> usize {
        self.count(|o| matches!(o, DeviceOutcome::Terminated { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(DeviceOutcome::is_failed)
    }

    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, DeviceOutcome::Aborted { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, DeviceOutcome::Cancelled { .. }))
    }

    fn count(&self, pred: impl Fn(&DeviceOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_each_outcome() {
        // Arrange
        let mut summary = SupervisorSummary::default();
        summary
            .outcomes
            .insert(DeviceId::from("a"), DeviceOutcome::Terminated { attempts: 1 });
        summary.outcomes.insert(
            DeviceId::from("b"),
            DeviceOutcome::Failed {
                attempts: 4,
                kind: FailureKind::Discovery,
                cause: "no response".into(),
            },
        );
        summary
            .outcomes
            .insert(DeviceId::from("c"), DeviceOutcome::Cancelled { attempts: 2 });

        // Act / Assert
        assert_eq!(summary.terminated(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.cancelled(), 1);
        assert_eq!(summary.outcome(&DeviceId::from("b")).unwrap().attempts(), 4);
    }

    #[test]
    fn test_event_display_is_readable() {
        let event = DeviceEvent::RestartScheduled {
            delay: Duration::from_millis(2000),
        };
        assert_eq!(event.to_string(), "restart scheduled in 2000ms");
        assert_eq!(
            DeviceEvent::Entered(ConnectionPhase::Selecting).to_string(),
            "entered selecting"
        );
    }
}
