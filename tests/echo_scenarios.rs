//! End-to-end echo scenarios over real mutual-TLS connections.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tls_echo::client::{ClientFleet, PayloadPool, SessionOutcome};
use tls_echo::config::TlsVersion;
use tls_echo::net::connection::ConnectionState;
use tls_echo::net::tls;
use tls_echo::ServerState;

mod common;

use common::{eventually, within, Pki};

#[tokio::test]
async fn test_single_client_echo() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;
    assert_eq!(server.state(), ServerState::Listening);

    let mut stream = common::connect(&server, pki.client_tls()).await.unwrap();
    stream.write_all(b"hello").await.unwrap();
    stream.flush().await.unwrap();

    let mut echo = [0u8; 5];
    within(Duration::from_secs(5), stream.read_exact(&mut echo)).await.unwrap();
    assert_eq!(&echo, b"hello");

    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 1).await);
    assert_eq!(server.accepted(), 1);

    stream.shutdown().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || server.connection_count() == 0).await);

    let snapshot = server.shutdown().await.unwrap();
    assert!(snapshot.read_operations >= 1);
    assert!(snapshot.write_operations >= 1);
    assert_eq!(snapshot.bytes_received, 5);
    assert_eq!(snapshot.bytes_sent, 5);
}

#[tokio::test]
async fn test_handshake_reports_peer_identity() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let stream = common::connect(&server, pki.client_tls()).await.unwrap();
    let info = tls::HandshakeInfo::from_state(stream.get_ref().1);
    assert!(info.handshake_complete);
    assert!(info.peer_verified);
    assert!(info.protocol.is_some());
    assert!(info.peer_subject.as_deref().unwrap_or_default().contains("echo-server"));

    drop(stream);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_untrusted_client_rejected() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    // Under TLS 1.3 the client finishes its side before the server checks the
    // certificate, so the rejection may only show on the first read.
    match common::connect(&server, pki.rogue_client_tls()).await {
        Err(_) => {}
        Ok(mut stream) => {
            let _ = stream.write_all(b"hello").await;
            let mut buf = [0u8; 5];
            let res = within(Duration::from_secs(5), stream.read(&mut buf)).await;
            assert!(matches!(res, Err(_) | Ok(0)));
        }
    }

    assert!(eventually(Duration::from_secs(2), || server.handshake_failures() == 1).await);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.accepted(), 0);

    // Other clients are unaffected.
    let mut stream = common::connect(&server, pki.client_tls()).await.unwrap();
    stream.write_all(b"still here").await.unwrap();
    let mut echo = [0u8; 10];
    within(Duration::from_secs(5), stream.read_exact(&mut echo)).await.unwrap();
    assert_eq!(&echo, b"still here");

    drop(stream);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_idle_connections() {
    let pki = Pki::new();
    // Idle window far longer than the test; only forced closure can end these.
    let server = common::start_server(&pki, common::server_config(600_000)).await;

    let mut streams = Vec::new();
    for _ in 0..10 {
        streams.push(common::connect(&server, pki.client_tls()).await.unwrap());
    }
    assert!(eventually(Duration::from_secs(5), || server.connection_count() == 10).await);

    let monitor = server.monitor();
    let handles = monitor.registry().snapshot();
    assert_eq!(handles.len(), 10);

    let started = Instant::now();
    let snapshot = within(Duration::from_secs(5), server.shutdown()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(snapshot.read_operations, 0);

    assert_eq!(monitor.state(), ServerState::Stopped);
    assert_eq!(monitor.connection_count(), 0);
    for handle in &handles {
        assert!(handle.is_closed());
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    for stream in &mut streams {
        let mut buf = [0u8; 1];
        let res = within(Duration::from_secs(5), stream.read(&mut buf)).await;
        assert!(matches!(res, Err(_) | Ok(0)));
    }
}

#[tokio::test]
async fn test_shutdown_reports_state_and_empty_registry() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(600_000)).await;

    let mut stream = common::connect(&server, pki.client_tls()).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    within(Duration::from_secs(5), stream.read_exact(&mut echo)).await.unwrap();
    assert!(eventually(Duration::from_secs(5), || server.connection_count() == 1).await);

    let monitor = server.monitor();
    assert_eq!(monitor.state(), ServerState::Listening);
    let handles = monitor.registry().snapshot();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].state(), ConnectionState::Looping);

    let snapshot = server.shutdown().await.unwrap();
    assert_eq!(snapshot.bytes_received, 4);
    assert_eq!(snapshot.bytes_sent, 4);

    assert_eq!(monitor.state(), ServerState::Stopped);
    assert!(monitor.registry().is_empty());
    assert!(monitor.registry().is_sealed());
    assert_eq!(handles[0].state(), ConnectionState::Closed);
    assert_eq!(monitor.statistics(), snapshot);
}

#[tokio::test]
async fn test_idle_connection_closed_by_server() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(300)).await;

    let mut stream = common::connect(&server, pki.client_tls()).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut echo = [0u8; 4];
    stream.read_exact(&mut echo).await.unwrap();

    assert!(eventually(Duration::from_secs(1), || server.connection_count() == 1).await);
    assert!(eventually(Duration::from_secs(3), || server.connection_count() == 0).await);

    let mut buf = [0u8; 1];
    let res = within(Duration::from_secs(2), stream.read(&mut buf)).await;
    assert!(matches!(res, Err(_) | Ok(0)));

    let snapshot = server.shutdown().await.unwrap();
    assert_eq!(snapshot.bytes_sent, 4);
}

#[tokio::test]
async fn test_session_verifies_echo() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let config = common::client_config(&server, 1);
    let fleet = ClientFleet::connect(&config, pki.client_tls()).await.unwrap();
    assert_eq!(fleet.len(), 1);
    assert!(fleet.sessions()[0].handshake().peer_verified);

    let payloads = Arc::new(PayloadPool::new(vec![b"hello".to_vec()]));
    let mut running = fleet.start(payloads, Some(20));
    within(Duration::from_secs(10), running.wait()).await;
    let report = running.stop().await;

    assert_eq!(report.sessions, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.round_trips, 20);
    assert_eq!(report.bytes_sent, 100);
    assert_eq!(report.bytes_received, 100);

    let snapshot = server.shutdown().await.unwrap();
    assert_eq!(snapshot.bytes_received, 100);
    assert_eq!(snapshot.bytes_sent, 100);
}

#[tokio::test]
async fn test_fleet_stop_ends_unbounded_sessions() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let config = common::client_config(&server, 4);
    let fleet = ClientFleet::connect(&config, pki.client_tls()).await.unwrap();
    let running = fleet.start(Arc::new(PayloadPool::random(50)), None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let report = within(Duration::from_secs(5), running.stop()).await;
    assert_eq!(report.sessions, 4);
    assert_eq!(report.failed, 0);
    assert!(report.round_trips > 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_hostname_verification_relaxed_for_bare_ip() {
    let pki = Pki::new();
    // Certificate carries a DNS name only; clients dial a bare IP.
    let dns_only = pki.ca.issue("echo-server", &["echo.internal"]);
    let server_tls = tls::server_config(dns_only.identity(), pki.ca.roots(), TlsVersion::Tls12).unwrap();
    let server = tls_echo::EchoServer::new(common::server_config(60_000), server_tls)
        .start()
        .await
        .unwrap();

    let strict = tls::client_config(pki.client.identity(), pki.ca.roots(), TlsVersion::Tls12, true).unwrap();
    assert!(common::connect(&server, strict.clone()).await.is_err());

    let relaxed = tls::client_config(pki.client.identity(), pki.ca.roots(), TlsVersion::Tls12, false).unwrap();
    let mut stream = common::connect(&server, relaxed).await.unwrap();
    stream.write_all(b"ip").await.unwrap();
    let mut echo = [0u8; 2];
    within(Duration::from_secs(5), stream.read_exact(&mut echo)).await.unwrap();
    assert_eq!(&echo, b"ip");

    // The name override keeps full verification working against a bare IP.
    let mut config = common::client_config(&server, 1);
    config.server_name = Some("echo.internal".to_string());
    let fleet = ClientFleet::connect(&config, strict).await.unwrap();
    let mut running = fleet.start(Arc::new(PayloadPool::new(vec![b"x".to_vec()])), Some(1));
    running.wait().await;
    assert_eq!(running.stop().await.round_trips, 1);

    drop(stream);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_relaxed_verification_still_checks_chain() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    // Client trusts only the rogue root, so the server chain cannot verify.
    let wrong_roots = tls::client_config(pki.client.identity(), pki.rogue.roots(), TlsVersion::Tls12, false).unwrap();
    assert!(common::connect(&server, wrong_roots).await.is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_stop_ends_client_sessions() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let config = common::client_config(&server, 8);
    let fleet = ClientFleet::connect(&config, pki.client_tls()).await.unwrap();
    let mut running = fleet.start(Arc::new(PayloadPool::random(100)), None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown().await.unwrap();

    // Sessions notice the closed connections on their own.
    within(Duration::from_secs(10), running.wait()).await;
    assert_eq!(running.active(), 0);
    let report = running.stop().await;
    assert_eq!(report.sessions, 8);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_session_runs_bounded_iterations() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let config = common::client_config(&server, 1);
    let fleet = ClientFleet::connect(&config, pki.client_tls()).await.unwrap();
    let session = fleet.into_sessions().remove(0);
    assert_eq!(session.index(), 0);
    assert_eq!(session.peer_addr(), server.local_addr());

    let stop = tls_echo::Shutdown::new();
    let report = session
        .run(Arc::new(PayloadPool::new(vec![b"abc".to_vec()])), Some(3), stop.subscribe())
        .await
        .unwrap();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.round_trips, 3);
    assert_eq!(report.bytes_received, 9);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopped_session_reports_stopped() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let config = common::client_config(&server, 1);
    let session = ClientFleet::connect(&config, pki.client_tls())
        .await
        .unwrap()
        .into_sessions()
        .remove(0);

    let stop = tls_echo::Shutdown::new();
    stop.trigger();
    let report = session
        .run(Arc::new(PayloadPool::random(10)), None, stop.subscribe())
        .await
        .unwrap();
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(report.round_trips, 0);

    server.shutdown().await.unwrap();
}

// Single-threaded runtime: the stopper task only runs if the session yields.
#[tokio::test]
async fn test_empty_only_pool_still_observes_stop() {
    let pki = Pki::new();
    let server = common::start_server(&pki, common::server_config(60_000)).await;

    let config = common::client_config(&server, 1);
    let session = ClientFleet::connect(&config, pki.client_tls())
        .await
        .unwrap()
        .into_sessions()
        .remove(0);

    // One payload of length zero: no round trip touches the socket.
    let payloads = Arc::new(PayloadPool::random(1));
    let stop = tls_echo::Shutdown::new();
    let signal = stop.subscribe();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.trigger();
    });

    let report = within(Duration::from_secs(5), session.run(payloads, None, signal))
        .await
        .unwrap();
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert!(report.empty_round_trips > 0);
    assert_eq!(report.round_trips, report.empty_round_trips);
    assert_eq!(report.bytes_sent, 0);
    stopper.await.unwrap();

    server.shutdown().await.unwrap();
}
