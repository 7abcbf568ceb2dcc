//! gwell-proxy library crate.
//!
//! Drives one independent P2P connection orchestration per camera: discover
//! relay servers over UDP, pick the best one, then hand it to the secure
//! channel, signaling and streaming phases.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! account service (HTTP/JSON)        rendezvous endpoints (UDP)
//!         ↕                                   ↕
//! [gwell-proxy]
//!   ├── domain/           ProxyConfig, DeviceReport, SupervisorSummary
//!   ├── application/      per-device state machine and the supervisor
//!   └── infrastructure/
//!         ├── network/    UDP discovery client
//!         ├── account_api HTTP client for roster, metadata, credentials
//!         ├── session_phases  secure channel / signaling / streaming adapter
//!         └── config_file TOML loading and validation
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `gwell-core`, and the traits it
//!   declares itself (`ServerDiscovery`, `SessionPhases`, `AccountApi`).
//! - `infrastructure` implements those traits with `tokio` and `reqwest`.

/// Domain layer: configuration and report types.
pub mod domain;

/// Application layer: connection state machine and orchestration supervisor.
pub mod application;

/// Infrastructure layer: UDP discovery, HTTP account client, config file.
pub mod infrastructure;
