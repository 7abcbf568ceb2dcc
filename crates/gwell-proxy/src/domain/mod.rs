//! Domain layer for gwell-proxy.
//!
//! Plain data shared between the application and infrastructure layers:
//! the runtime configuration and the reports each device task emits.
//! Nothing here performs I/O or reads the environment.

pub mod config;
pub mod events;

pub use config::ProxyConfig;
pub use events::{DeviceEvent, DeviceOutcome, DeviceReport, SupervisorSummary};
