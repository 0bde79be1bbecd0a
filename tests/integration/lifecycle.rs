use std::time::{Duration, Instant};

use crate::*;

/// Idle sessions are evicted by the sweep and their address is reused.
#[tokio::test]
async fn idle_session_is_swept_and_address_reused() {
    let first = Keypair::generate();
    let second = Keypair::generate();
    let t = tunnel(&[&first, &second]);
    let mut tc = connect(&t.app, &first).await.unwrap();
    let ip = tc.setting().ip;

    let timeout = t.config.sessions.idle_timeout();
    assert_eq!(t.sessions.sweep(Instant::now()), 0);
    assert_eq!(t.sessions.sweep(Instant::now() + timeout), 1);
    assert_eq!(t.sessions.leased_count(), 0);

    let (status, _) = exchange(&t.app, &mut tc, &[]).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let other = connect(&t.app, &second).await.unwrap();
    assert_eq!(other.setting().ip, ip);
}

/// Traffic keeps a session alive past its original deadline.
#[tokio::test]
async fn activity_defers_eviction() {
    let client = Keypair::generate();
    let mut config = HtunConfig::default();
    config.sessions.idle_timeout_secs = 1;
    let t = tunnel_with(config, &[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();
    let established = Instant::now();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let (status, _) = exchange(&t.app, &mut tc, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    // Past the handshake's deadline, within the exchange's.
    assert_eq!(t.sessions.sweep(established + Duration::from_millis(1100)), 0);
    let (status, _) = exchange(&t.app, &mut tc, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

/// The background sweeper releases leases on its own and stops on shutdown.
#[tokio::test]
async fn sweep_loop_evicts_in_background() {
    let client = Keypair::generate();
    let mut config = HtunConfig::default();
    config.sessions.idle_timeout_secs = 1;
    config.sessions.sweep_interval_secs = 1;
    let t = tunnel_with(config, &[&client]);
    connect(&t.app, &client).await.unwrap();
    assert_eq!(t.sessions.leased_count(), 1);

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let sweeper = tokio::spawn(
        t.sessions
            .clone()
            .sweep_loop(t.config.sessions.sweep_interval(), shutdown_rx),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while t.sessions.leased_count() > 0 {
        assert!(Instant::now() < deadline, "sweeper never evicted the session");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(t.sessions.is_empty());

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), sweeper)
        .await
        .unwrap()
        .unwrap();
}

/// After teardown the client re-handshakes onto its old address.
#[tokio::test]
async fn rehandshake_after_teardown_recovers() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);
    let mut tc = connect(&t.app, &client).await.unwrap();
    let ip = tc.setting().ip;

    let garbage = Bytes::from_static(&[0, 20, 1, 2, 3]);
    let (status, _) = send(&t.app, data_request(&tc.data_credentials(), garbage)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = exchange(&t.app, &mut tc, &[]).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut fresh = connect(&t.app, &client).await.unwrap();
    assert_eq!(fresh.setting().ip, ip);
    let (status, _) = exchange(&t.app, &mut fresh, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.sessions.len(), 1);
}
