//! Domain entities for the P2P proxy.
//!
//! Pure data and invariants, no I/O.  Everything the orchestrator moves
//! between phases is defined here:
//!
//! - [`device`] – the camera identity, its immutable metadata, and the
//!   secret access credential that authorises one streaming session.
//! - [`candidate`] – one relay server returned by discovery together with
//!   the quality signal measured for it.
//! - [`connection`] – the phase enum and the per-device `ConnectionState`
//!   record, including the transition table.

pub mod candidate;
pub mod connection;
pub mod device;
