//! Error types crossing the application layer's trait seams.
//!
//! Each collaborator has its own error enum; [`OrchestrationError`] wraps them
//! with the phase they surfaced in.

use std::time::Duration;

use gwell_core::{ConnectionPhase, DeviceId, FailureKind, SelectionError};
use thiserror::Error;

/// Failures of the discovery protocol client.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery window elapsed without any endpoint replying.
    #[error("no rendezvous endpoint replied within {window:?} ({endpoints} probed)")]
    NoResponse { endpoints: usize, window: Duration },

    /// The probe could not be sent at all.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(#[source] std::io::Error),

    /// Discovery did not return within its overall bound.
    #[error("discovery did not complete within {0:?}")]
    TimedOut(Duration),
}

/// Failures reported by the secure channel, signaling and streaming phases.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// This build has no implementation for the phase.
    #[error("{0} is not available in this build")]
    Unsupported(ConnectionPhase),

    #[error("phase did not complete within {0:?}")]
    TimedOut(Duration),

    /// The remote side refused or broke the exchange.
    #[error("rejected by peer: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the account service client.
#[derive(Debug, Error)]
pub enum AccountApiError {
    #[error("invalid account service URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// The request never produced an HTTP response.
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("device {0} is unknown to the account service")]
    UnknownDevice(DeviceId),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("could not decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    /// The health endpoint never reported ready.
    #[error("account service not ready after {0:?}")]
    NotReady(Duration),
}

/// Why one device orchestration attempt stopped.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("device info fetch failed: {0}")]
    DeviceInfoFetch(#[source] AccountApiError),

    #[error("credential fetch failed: {0}")]
    CredentialFetch(#[source] AccountApiError),

    #[error("discovery failed: {0}")]
    Discovery(#[source] DiscoveryError),

    #[error("selection failed: {0}")]
    Selection(#[source] SelectionError),

    #[error("secure channel failed: {0}")]
    SecureChannel(#[source] PhaseError),

    #[error("signaling failed: {0}")]
    Signaling(#[source] PhaseError),

    #[error("stream failed: {0}")]
    Stream(#[source] PhaseError),
}

impl OrchestrationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::DeviceInfoFetch(_) => FailureKind::DeviceInfoFetch,
            Self::CredentialFetch(_) => FailureKind::CredentialFetch,
            Self::Discovery(_) => FailureKind::Discovery,
            Self::Selection(_) => FailureKind::Selection,
            Self::SecureChannel(_) => FailureKind::SecureChannel,
            Self::Signaling(_) => FailureKind::Signaling,
            Self::Stream(_) => FailureKind::Stream,
        }
    }

    /// `false` when restarting the device cannot change the result.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DeviceInfoFetch(AccountApiError::UnknownDevice(_))
            | Self::CredentialFetch(AccountApiError::UnknownDevice(_)) => false,
            Self::SecureChannel(PhaseError::Unsupported(_))
            | Self::Signaling(PhaseError::Unsupported(_))
            | Self::Stream(PhaseError::Unsupported(_)) => false,
            _ => true,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
