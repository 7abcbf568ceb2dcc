//! Application layer use cases for the proxy.
//!
//! Use cases here depend on traits, never on sockets or HTTP clients, so the
//! whole orchestration can be exercised with in-memory fakes.
//!
//! # Sub-modules
//!
//! - **`connect_device`** – The per-device connection state machine and the
//!   `ServerDiscovery` / `SessionPhases` seams it drives.
//!
//! - **`supervise_devices`** – Launches one isolated task per device,
//!   restarts failed devices with backoff, and handles shutdown.  Declares
//!   the `AccountApi` seam.
//!
//! - **`errors`** – The error taxonomy shared by both use cases.

pub mod connect_device;
pub mod errors;
pub mod supervise_devices;

pub use connect_device::{
    shutdown_requested, AttemptOutcome, DeviceConnection, PhaseTimeouts, ServerDiscovery,
    SessionContext, SessionPhases,
};
pub use errors::{AccountApiError, DiscoveryError, OrchestrationError, PhaseError};
pub use supervise_devices::{AccountApi, RestartPolicy, Supervisor};
