//! Session phase adapter shipped with the proxy.
//!
//! The relay handshake that follows selection is not implemented yet, so
//! [`DeferredSessionPhases`] stops every device at the secure channel phase
//! with [`PhaseError::Unsupported`].  The supervisor treats that as final and
//! does not restart the device.

use async_trait::async_trait;
use gwell_core::ConnectionPhase;
use tracing::info;

use crate::application::connect_device::{SessionContext, SessionPhases};
use crate::application::errors::PhaseError;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredSessionPhases;

#[async_trait]
impl SessionPhases for DeferredSessionPhases {
    async fn negotiate_secure_channel(&self, ctx: &SessionContext) -> Result<(), PhaseError> {
        info!(
            device = %ctx.device.id,
            server = %ctx.server,
            access_id = %ctx.credential.access_id,
            "relay chosen; secure channel handshake not available"
        );
        Err(PhaseError::Unsupported(
            ConnectionPhase::NegotiatingSecureChannel,
        ))
    }

    async fn signal(&self, _ctx: &SessionContext) -> Result<(), PhaseError> {
        Err(PhaseError::Unsupported(ConnectionPhase::Signaling))
    }

    async fn stream(&self, _ctx: &SessionContext) -> Result<(), PhaseError> {
        Err(PhaseError::Unsupported(ConnectionPhase::Streaming))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
