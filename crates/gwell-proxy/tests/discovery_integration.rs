//! End-to-end tests over loopback UDP: a fake rendezvous endpoint, fake relay
//! candidates, the real discovery client, and the shipped session adapter.

use std::net::SocketAddr;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::{Duration, Instant};

use gwell_core::protocol::{encode_server_list, ServerEntry};
use gwell_core::{AccessCredential, ConnectionPhase, Device, DeviceId, FailureKind};
use gwell_proxy::application::{DiscoveryError, ServerDiscovery, Supervisor};
use gwell_proxy::domain::{DeviceEvent, DeviceOutcome, ProxyConfig};
use gwell_proxy::infrastructure::network::UdpDiscoveryClient;
use gwell_proxy::infrastructure::session_phases::DeferredSessionPhases;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn config_for(rendezvous: Vec<SocketAddr>) -> ProxyConfig {
    ProxyConfig {
        rendezvous: rendezvous.iter().map(|a| a.to_string()).collect(),
        discovery_timeout: Duration::from_millis(400),
        probe_interval: Duration::from_millis(100),
        candidate_probe_timeout: Duration::from_millis(200),
        max_restarts: 2,
        restart_backoff: Duration::from_millis(10),
        ..ProxyConfig::default()
    }
}

fn entry(addr: SocketAddr, server_id: u16, level: u32) -> ServerEntry {
    ServerEntry {
        address: addr.ip(),
        server_id,
        primary_port: addr.port(),
        secondary_port: addr.port(),
        stamp: 0,
        level,
    }
}

async fn spawn_rendezvous(entries: Vec<ServerEntry>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let reply = encode_server_list(&entries);
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((_, src)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&reply, src).await;
        }
    });
    addr
}

async fn spawn_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], src).await;
        }
    });
    addr
}

#[tokio::test]
async fn test_device_reaches_secure_channel_with_reachable_relay() {
    // Arrange: the better-levelled candidate is silent, the other answers.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    let echo = spawn_echo().await;
    let rendezvous = spawn_rendezvous(vec![entry(silent_addr, 1, 0), entry(echo, 2, 1)]).await;
    let config = config_for(vec![rendezvous]);

    let (tx, mut rx) = mpsc::channel(64);
    let supervisor = Supervisor::new(
        Arc::new(UdpDiscoveryClient::from_config(&config)),
        Arc::new(DeferredSessionPhases),
        &config,
        Arc::new(AtomicBool::new(true)),
        tx,
    );
    let device = Device::new("GW_BE1_LOOPBACK");
    let credential = AccessCredential::new("42", "loopback-token-0123456789abcdef");

    // Act
    let summary = supervisor.run(vec![(device, credential)]).await;
    drop(supervisor);

    // Assert: stopped at the secure channel and not restarted
    let outcome = summary.outcome(&DeviceId::from("GW_BE1_LOOPBACK"));
    assert!(matches!(
        outcome,
        Some(DeviceOutcome::Failed {
            attempts: 1,
            kind: FailureKind::SecureChannel,
            ..
        })
    ));

    let mut selected = None;
    let mut failed_in = None;
    while let Ok(report) = rx.try_recv() {
        match report.event {
            DeviceEvent::ServerSelected(server) => selected = Some(server),
            DeviceEvent::Failed(failure) => failed_in = Some(failure.phase),
            _ => {}
        }
    }
    let selected = selected.expect("a server must have been selected");
    assert_eq!(selected.address, echo);
    assert!(selected.is_reachable());
    assert_eq!(failed_in, Some(ConnectionPhase::NegotiatingSecureChannel));
}

#[tokio::test]
async fn test_silent_rendezvous_fails_discovery_within_bound() {
    // Arrange
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(vec![silent.local_addr().unwrap()]);
    let client = UdpDiscoveryClient::from_config(&config);

    // Act
    let started = Instant::now();
    let result = client.discover_servers(&DeviceId::from("GW_BE1_SILENT")).await;

    // Assert
    assert!(matches!(result, Err(DiscoveryError::NoResponse { .. })));
    assert!(started.elapsed() <= config.discovery_budget() + Duration::from_millis(300));
}

#[tokio::test]
async fn test_one_live_endpoint_is_enough() {
    // Arrange
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let echo = spawn_echo().await;
    let live = spawn_rendezvous(vec![entry(echo, 5, 0)]).await;
    let config = config_for(vec![silent.local_addr().unwrap(), live]);

    // Act
    let candidates = UdpDiscoveryClient::from_config(&config)
        .discover()
        .await
        .unwrap();

    // Assert
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].server_id, 5);
    assert!(candidates[0].is_reachable());
}
