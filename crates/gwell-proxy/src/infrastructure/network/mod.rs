//! Network infrastructure for the proxy.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Requests relay server lists from the rendezvous
//!   endpoints over UDP, merges the replies, and measures each candidate's
//!   round-trip time with a quality probe.

pub mod discovery;

pub use discovery::UdpDiscoveryClient;
