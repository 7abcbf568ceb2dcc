//! UDP discovery client for the rendezvous service.
//!
//! One discovery call:
//!
//! 1. Resolves every configured `host:port` endpoint (unresolvable ones are
//!    skipped with a warning).
//! 2. Sends the 8-byte server-list request to each endpoint and re-sends it
//!    every `probe_interval` to endpoints that have not answered yet, until
//!    all have answered or the discovery window closes.
//! 3. Decodes each reply and merges the entries, keeping the first sighting
//!    of every server address.
//! 4. Sends one quality probe to every candidate and records the round-trip
//!    time of those that answer within `candidate_probe_timeout`.
//!
//! Datagrams from addresses that were never probed are dropped.  One socket
//! per address family is bound on first use and lives only for the duration
//! of the call, so IPv4 and IPv6 endpoints and candidates can be mixed.
//!
//! # Result semantics
//!
//! | Situation                                  | Result                     |
//! |--------------------------------------------|----------------------------|
//! | at least one endpoint replied              | `Ok(candidates)`, maybe [] |
//! | no endpoint replied within the window      | `Err(NoResponse)`          |
//! | nothing resolved, bind failed, sends failed| `Err(NetworkUnreachable)`  |

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use gwell_core::protocol::{
    decode_server_list, encode_candidate_probe, encode_server_list_request,
};
use gwell_core::{CandidateServer, DeviceId};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::application::connect_device::ServerDiscovery;
use crate::application::errors::DiscoveryError;
use crate::domain::config::ProxyConfig;

/// Large enough for the biggest well-formed server list.
const RECV_BUFFER_SIZE: usize = 4096;

/// [`ServerDiscovery`] over UDP.
#[derive(Debug, Clone)]
pub struct UdpDiscoveryClient {
    endpoints: Vec<String>,
    window: Duration,
    probe_interval: Duration,
    candidate_probe_timeout: Duration,
}

impl UdpDiscoveryClient {
    pub fn new(
        endpoints: Vec<String>,
        window: Duration,
        probe_interval: Duration,
        candidate_probe_timeout: Duration,
    ) -> Self {
        Self {
            endpoints,
            window,
            probe_interval,
            candidate_probe_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.rendezvous.clone(),
            config.discovery_timeout,
            config.probe_interval,
            config.candidate_probe_timeout,
        )
    }

    /// Runs one complete discovery round.
    ///
    /// # Errors
    ///
    /// See the module-level table.
    pub async fn discover(&self) -> Result<Vec<CandidateServer>, DiscoveryError> {
        let endpoints = self.resolve_endpoints().await;
        if endpoints.is_empty() {
            return Err(DiscoveryError::NetworkUnreachable(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no rendezvous endpoint could be resolved",
            )));
        }

        let mut sockets = FamilySockets::default();
        let mut candidates = self.collect_server_lists(&mut sockets, &endpoints).await?;
        self.probe_candidates(&mut sockets, &mut candidates).await;
        Ok(candidates)
    }

    async fn resolve_endpoints(&self) -> Vec<SocketAddr> {
        let mut resolved = Vec::new();
        for endpoint in &self.endpoints {
            match lookup_host(endpoint.as_str()).await {
                Ok(addrs) => {
                    for addr in addrs.map(canonical) {
                        if !resolved.contains(&addr) {
                            resolved.push(addr);
                        }
                    }
                }
                Err(e) => warn!(%endpoint, error = %e, "could not resolve rendezvous endpoint"),
            }
        }
        resolved
    }

    /// Phase one: request server lists until every endpoint answered or the
    /// window closes.
    async fn collect_server_lists(
        &self,
        sockets: &mut FamilySockets,
        endpoints: &[SocketAddr],
    ) -> Result<Vec<CandidateServer>, DiscoveryError> {
        let request = encode_server_list_request();
        let deadline = Instant::now() + self.window;
        let mut pending: HashSet<SocketAddr> = endpoints.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut replies = 0usize;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut first_round = true;

        while !pending.is_empty() && Instant::now() < deadline {
            let mut last_send_error = None;
            let mut sent = 0usize;
            for endpoint in &pending {
                match sockets.send_to(&request, *endpoint).await {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        debug!(%endpoint, error = %e, "server-list request not sent");
                        last_send_error = Some(e);
                    }
                }
            }
            if first_round && sent == 0 {
                if let Some(e) = last_send_error {
                    return Err(DiscoveryError::NetworkUnreachable(e));
                }
            }
            first_round = false;

            let resend_at = (Instant::now() + self.probe_interval).min(deadline);
            while !pending.is_empty() {
                let Ok(received) = timeout_at(resend_at, sockets.recv_from(&mut buf)).await else {
                    break;
                };
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        // ICMP unreachable surfaces here on some platforms.
                        debug!(error = %e, "recv error while collecting server lists");
                        continue;
                    }
                };
                if !pending.contains(&src) {
                    debug!(%src, "ignoring datagram from unexpected source");
                    continue;
                }

                match decode_server_list(&buf[..len]) {
                    Ok(entries) => {
                        pending.remove(&src);
                        replies += 1;
                        debug!(%src, count = entries.len(), "server list received");
                        for entry in entries {
                            let addr = canonical(entry.socket_addr());
                            if seen.insert(addr) {
                                let mut candidate = CandidateServer::new(
                                    addr,
                                    entry.server_id,
                                    entry.level,
                                    candidates.len(),
                                );
                                candidate.secondary_port = entry.secondary_port;
                                candidates.push(candidate);
                            }
                        }
                    }
                    Err(e) => debug!(%src, error = %e, "ignoring malformed server list"),
                }
            }
        }

        if replies == 0 {
            return Err(DiscoveryError::NoResponse {
                endpoints: endpoints.len(),
                window: self.window,
            });
        }
        info!(
            replies,
            endpoints = endpoints.len(),
            candidates = candidates.len(),
            "server lists collected"
        );
        Ok(candidates)
    }

    /// Phase two: one quality probe per candidate; the first datagram back
    /// from a candidate's address sets its round-trip time.
    async fn probe_candidates(
        &self,
        sockets: &mut FamilySockets,
        candidates: &mut [CandidateServer],
    ) {
        if candidates.is_empty() {
            return;
        }

        let mut outstanding: HashMap<SocketAddr, (usize, Instant)> = HashMap::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let probe = encode_candidate_probe(index as u32);
            match sockets.send_to(&probe, candidate.address).await {
                Ok(_) => {
                    outstanding.insert(candidate.address, (index, Instant::now()));
                }
                Err(e) => debug!(server = %candidate.address, error = %e, "quality probe not sent"),
            }
        }

        let deadline = Instant::now() + self.candidate_probe_timeout;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        while !outstanding.is_empty() {
            let Ok(received) = timeout_at(deadline, sockets.recv_from(&mut buf)).await else {
                break;
            };
            let Ok((_, src)) = received else {
                continue;
            };
            if let Some((index, sent_at)) = outstanding.remove(&src) {
                candidates[index].rtt = Some(sent_at.elapsed());
            }
        }

        let reachable = candidates.iter().filter(|c| c.is_reachable()).count();
        debug!(reachable, total = candidates.len(), "candidate probing complete");
    }
}

#[async_trait]
impl ServerDiscovery for UdpDiscoveryClient {
    async fn discover_servers(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<CandidateServer>, DiscoveryError> {
        debug!(device = %device_id, endpoints = self.endpoints.len(), "starting discovery");
        self.discover().await
    }
}

/// Ephemeral sockets for one discovery call, one per address family.
#[derive(Default)]
struct FamilySockets {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl FamilySockets {
    /// Sends `buf` to `target`, binding the matching family's socket first
    /// if needed.
    async fn send_to(&mut self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let (slot, local) = match target {
            SocketAddr::V4(_) => (&mut self.v4, "0.0.0.0:0"),
            SocketAddr::V6(_) => (&mut self.v6, "[::]:0"),
        };
        let socket = match slot.take() {
            Some(socket) => socket,
            None => UdpSocket::bind(local).await?,
        };
        slot.insert(socket).send_to(buf, target).await
    }

    /// Receives from whichever bound socket has a datagram first.  Never
    /// completes while no socket is bound; callers bound it with a timeout.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (len, src) = match (&self.v4, &self.v6) {
            (Some(socket), None) | (None, Some(socket)) => socket.recv_from(buf).await?,
            (Some(v4), Some(v6)) => loop {
                let ready = tokio::select! {
                    r = v4.readable() => r.map(|()| v4),
                    r = v6.readable() => r.map(|()| v6),
                };
                match ready?.try_recv_from(buf) {
                    Ok(received) => break received,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(e),
                }
            },
            (None, None) => std::future::pending().await,
        };
        Ok((len, canonical(src)))
    }
}

/// Folds IPv4-mapped IPv6 addresses back to IPv4 so lookups match.
fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
