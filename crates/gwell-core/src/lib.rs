//! # gwell-core
//!
//! Shared library for the Gwell P2P proxy containing the device and credential
//! model, the per-device connection state record, the rendezvous wire codec,
//! and the relay selection policy.
//!
//! It has zero dependencies on sockets, HTTP clients, or async runtimes, so
//! everything in here can be unit-tested without a network.
//!
//! # Architecture overview
//!
//! A camera sits behind NAT.  To stream from it we first ask one or more
//! *rendezvous* endpoints for the list of P2P relay servers able to broker a
//! session, pick the best relay, and then hand that relay to the secure
//! channel / signaling / streaming phases.
//!
//! - **`domain`** – Devices, access credentials (with log redaction),
//!   candidate relay servers, and the [`ConnectionState`] record that one
//!   orchestration owns for its whole lifetime.
//!
//! - **`protocol`** – How the server-list request, the server-list reply and
//!   the candidate quality probe look on the wire.
//!
//! - **`selection`** – The pure policy that turns a candidate set into exactly
//!   one chosen relay.

pub mod domain;
pub mod protocol;
pub mod selection;

pub use domain::candidate::CandidateServer;
pub use domain::connection::{
    ConnectionPhase, ConnectionState, FailureKind, PhaseFailure, TransitionError,
};
pub use domain::device::{AccessCredential, Device, DeviceId, RedactedToken};
pub use protocol::server_list::{decode_server_list, ServerEntry, ServerListError};
pub use selection::{select_best, SelectionError};
