//! HTTP handlers — the handshake and data endpoints.

pub mod data;
pub mod handshake;

use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use ipnet::Ipv4Net;

use htun_core::config::HtunConfig;
use htun_core::crypto::Keypair;
use htun_services::{ClientRegistry, PacketDelivery, SessionTable};

/// Network parameters handed to clients and enforced on the data path.
#[derive(Debug, Clone, Copy)]
pub struct TunnelSettings {
    pub subnet: Ipv4Net,
    pub mtu: u16,
    pub dns_port: u16,
    /// Most packets returned per data-path response.
    pub max_batch_packets: usize,
}

impl TunnelSettings {
    pub fn from_config(config: &HtunConfig) -> Self {
        Self {
            subnet: config.network.subnet.trunc(),
            mtu: config.network.mtu,
            dns_port: config.network.dns_port,
            max_batch_packets: config.sessions.max_batch_packets.max(1),
        }
    }
}

#[derive(Clone)]
pub struct TunnelState {
    pub keypair: Arc<Keypair>,
    pub registry: ClientRegistry,
    pub sessions: SessionTable,
    pub delivery: Arc<dyn PacketDelivery>,
    pub settings: TunnelSettings,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// A 200 carrying raw protocol bytes.
fn octet_stream(body: impl Into<Bytes>) -> Response {
    ([(CONTENT_TYPE, "application/octet-stream")], body.into()).into_response()
}

pub use data::handle_data;
pub use handshake::handle_handshake;
