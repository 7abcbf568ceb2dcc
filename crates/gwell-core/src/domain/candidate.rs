//! Candidate relay servers returned by discovery.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;

/// One relay/P2P server able to broker a session, plus the quality signal
/// measured for it during discovery.
///
/// Candidates are ephemeral: they live for one Discovery → Selection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateServer {
    /// Address the session phases should contact.
    pub address: SocketAddr,
    /// Server id assigned by the rendezvous service.
    pub server_id: u16,
    /// Secondary port advertised alongside the primary one.
    pub secondary_port: u16,
    /// Rendezvous-assigned preference level; lower is better.
    pub level: u32,
    /// Round-trip time of the quality probe, or `None` if the candidate never
    /// answered within the probe window.
    pub rtt: Option<Duration>,
    /// Position in which discovery first saw this candidate.  Used as the
    /// final tie-breaker so selection is deterministic.
    pub first_seen: usize,
}

impl CandidateServer {
    /// Creates an unprobed candidate.
    pub fn new(address: SocketAddr, server_id: u16, level: u32, first_seen: usize) -> Self {
        Self {
            address,
            server_id,
            secondary_port: address.port(),
            level,
            rtt: None,
            first_seen,
        }
    }

    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = Some(rtt);
        self
    }

    /// `true` if the candidate answered its quality probe.
    pub fn is_reachable(&self) -> bool {
        self.rtt.is_some()
    }
}

impl fmt::Display for CandidateServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} srv_id={} level={}", self.address, self.server_id, self.level)?;
        match self.rtt {
            Some(rtt) => write!(f, " rtt={}ms", rtt.as_millis()),
            None => f.write_str(" rtt=unreachable"),
        }
    }
}
