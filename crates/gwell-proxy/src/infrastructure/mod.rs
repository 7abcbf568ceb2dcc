//! Infrastructure layer for the proxy.
//!
//! OS- and network-facing adapters: the UDP discovery client, the HTTP
//! account client, the session phase adapter, and TOML config loading.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `gwell_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod account_api;
pub mod config_file;
pub mod network;
pub mod session_phases;
