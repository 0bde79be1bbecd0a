//! htun integration test harness.
//!
//! Every test builds the full router in-process and drives it with
//! `tower::ServiceExt::oneshot`, playing the client side through
//! `htun_core::client`. No sockets are opened.
//!
//!   cargo test --test integration

use std::sync::Arc;

use anyhow::{bail, Result};
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use tokio::sync::mpsc;
use tower::ServiceExt;

use htun_api::{TunnelSettings, TunnelState};
use htun_core::auth::BasicCredentials;
use htun_core::client::{HandshakeStart, TunnelClient};
use htun_core::config::HtunConfig;
use htun_core::crypto::Keypair;
use htun_services::{ClientRegistry, IpAllocator, PacketQueues, SessionTable};

mod data_path;
mod handshake;
mod lifecycle;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const HANDSHAKE_PATH: &str = "/vpn/auth";
pub const DATA_PATH: &str = "/vpn/";

/// A running tunnel, minus the listener.
pub struct Tunnel {
    pub app: Router,
    pub sessions: SessionTable,
    pub queues: Arc<PacketQueues>,
    pub server: Arc<Keypair>,
    pub config: HtunConfig,
    pub uplink: mpsc::Receiver<Bytes>,
}

/// Tunnel with default config and the given registered clients.
pub fn tunnel(clients: &[&Keypair]) -> Tunnel {
    tunnel_with(HtunConfig::default(), clients)
}

pub fn tunnel_with(mut config: HtunConfig, clients: &[&Keypair]) -> Tunnel {
    let server = Arc::new(Keypair::generate());
    config.identity.private_key = server.private_hex().to_string();
    config.clients.public_keys = clients.iter().map(|k| hex_key(k)).collect();
    config.validate().expect("test config must be valid");

    let subnet = config.network.subnet.trunc();
    let server_ip = config.network.server_address().expect("subnet has hosts");
    let (uplink_tx, uplink) = mpsc::channel(64);
    let queues = Arc::new(
        PacketQueues::new(subnet, config.sessions.queue_depth).with_uplink(uplink_tx),
    );
    let sessions = SessionTable::new(
        IpAllocator::new(subnet, server_ip),
        queues.clone(),
        config.sessions.idle_timeout(),
    );
    let state = TunnelState {
        keypair: server.clone(),
        registry: ClientRegistry::new(config.client_keys().expect("valid client keys")),
        sessions: sessions.clone(),
        delivery: queues.clone(),
        settings: TunnelSettings::from_config(&config),
    };
    let app = htun_api::router(state, &config.server);

    Tunnel {
        app,
        sessions,
        queues,
        server,
        config,
        uplink,
    }
}

pub fn hex_key(keypair: &Keypair) -> String {
    hex::encode(keypair.public)
}

/// Send one request through the router; returns status and body.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    (status, body)
}

pub fn handshake_request(creds: &BasicCredentials) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(HANDSHAKE_PATH)
        .header(AUTHORIZATION, creds.to_header())
        .body(Body::empty())
        .expect("valid request")
}

pub fn data_request(creds: &BasicCredentials, body: Bytes) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(DATA_PATH)
        .header(AUTHORIZATION, creds.to_header())
        .body(Body::from(body))
        .expect("valid request")
}

/// Run a full handshake for `client`.
pub async fn connect(app: &Router, client: &Keypair) -> Result<TunnelClient> {
    let start = HandshakeStart::new(client)?;
    let (status, body) = send(app, handshake_request(start.credentials())).await;
    if status != StatusCode::OK {
        bail!("handshake answered {status}");
    }
    Ok(TunnelClient::complete(start, &body)?)
}

/// Exchange one batch. Returns the status and, on 200, the decoded reply.
pub async fn exchange(
    app: &Router,
    client: &mut TunnelClient,
    packets: &[Vec<u8>],
) -> Result<(StatusCode, Vec<Bytes>)> {
    let body = client.encode_batch(packets)?;
    let (status, reply) = send(app, data_request(&client.data_credentials(), body)).await;
    if status != StatusCode::OK {
        return Ok((status, Vec::new()));
    }
    Ok((status, client.decode_batch(&reply)?))
}
