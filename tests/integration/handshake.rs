use std::net::Ipv4Addr;

use htun_core::auth::{BasicCredentials, MAX_FIELD_CHARS};
use htun_core::client::HandshakeStart;

use crate::*;

/// Registered client gets the first client address and the configured network.
#[tokio::test]
async fn registered_client_receives_setting() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);

    let tunnel_client = connect(&t.app, &client).await.unwrap();
    let setting = tunnel_client.setting();
    assert_eq!(setting.ip, Ipv4Addr::new(192, 168, 4, 2));
    assert_eq!(setting.subnet.to_string(), "192.168.4.0/24");
    assert_eq!(setting.mtu, 1400);
    assert_eq!(setting.dns_port, 53);
    assert_eq!(tunnel_client.server_public(), &t.server.public);
    assert_eq!(t.sessions.len(), 1);
}

/// Unregistered key: bare 401, nothing leased, no session.
#[tokio::test]
async fn unregistered_client_is_refused() {
    let registered = Keypair::generate();
    let stranger = Keypair::generate();
    let t = tunnel(&[&registered]);

    let start = HandshakeStart::new(&stranger).unwrap();
    let (status, body) = send(&t.app, handshake_request(start.credentials())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.is_empty());
    assert!(t.sessions.is_empty());
    assert_eq!(t.sessions.leased_count(), 0);
}

/// Malformed handshakes look exactly like an unregistered key.
#[tokio::test]
async fn malformed_handshakes_get_the_same_answer() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);

    let too_long = "A".repeat(MAX_FIELD_CHARS + 1);
    let cases = [
        BasicCredentials::new("", ""),
        BasicCredentials::new("AAAA", "AAAA"),
        BasicCredentials::new("not*base64", "AAAA"),
        BasicCredentials::new(too_long.as_str(), "AAAA"),
        BasicCredentials::new("A".repeat(60).as_str(), "B".repeat(60).as_str()),
    ];
    for creds in &cases {
        let (status, body) = send(&t.app, handshake_request(creds)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{creds:?}");
        assert!(body.is_empty());
    }
    assert_eq!(t.sessions.leased_count(), 0);
}

/// Two handshakes in a row: same address, one session, old one unusable.
#[tokio::test]
async fn repeat_handshake_keeps_address() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);

    let mut first = connect(&t.app, &client).await.unwrap();
    let mut second = connect(&t.app, &client).await.unwrap();
    assert_eq!(first.setting().ip, second.setting().ip);
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(t.sessions.len(), 1);
    assert_eq!(t.sessions.leased_count(), 1);

    let (status, _) = exchange(&t.app, &mut second, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let (status, _) = exchange(&t.app, &mut first, &[]).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// Concurrent handshakes from distinct clients never share an address.
#[tokio::test]
async fn concurrent_clients_get_distinct_addresses() {
    let clients: Vec<Keypair> = (0..16).map(|_| Keypair::generate()).collect();
    let refs: Vec<&Keypair> = clients.iter().collect();
    let t = tunnel(&refs);

    let mut tasks = tokio::task::JoinSet::new();
    for client in clients {
        let app = t.app.clone();
        tasks.spawn(async move { connect(&app, &client).await.map(|c| c.setting().ip) });
    }

    let mut seen = std::collections::HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let ip = joined.unwrap().unwrap();
        assert!(seen.insert(ip), "{ip} handed out twice");
    }
    assert_eq!(seen.len(), 16);
    assert_eq!(t.sessions.len(), 16);
}

/// A full pool refuses the newcomer without disturbing existing sessions.
#[tokio::test]
async fn exhausted_pool_refuses_new_clients() {
    let a = Keypair::generate();
    let b = Keypair::generate();
    let mut config = HtunConfig::default();
    config.network.subnet = "10.9.0.0/30".parse().unwrap();
    let t = tunnel_with(config, &[&a, &b]);

    let mut first = connect(&t.app, &a).await.unwrap();
    assert_eq!(first.setting().ip, Ipv4Addr::new(10, 9, 0, 2));
    assert!(connect(&t.app, &b).await.is_err());

    let (status, _) = exchange(&t.app, &mut first, &[]).await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

/// A replayed message 1 displaces the live session, and the table counts it.
#[tokio::test]
async fn replayed_handshake_is_counted_as_replacement() {
    let client = Keypair::generate();
    let t = tunnel(&[&client]);
    let mut live = connect(&t.app, &client).await.unwrap();

    let start = HandshakeStart::new(&client).unwrap();
    let captured = start.credentials().clone();
    let (status, _) = send(&t.app, handshake_request(&captured)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, handshake_request(&captured)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.sessions.replaced_count(), 2);

    let (status, _) = exchange(&t.app, &mut live, &[]).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
