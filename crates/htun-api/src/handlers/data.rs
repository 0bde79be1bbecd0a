//! POST {base}/ — encrypted packet exchange.
//!
//! The request body is the client's batch, the response body whatever was
//! queued for the client since its last request. Any failure expires the
//! session, so the client has to handshake again.

use std::net::Ipv4Addr;
use std::time::Instant;

use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;

use htun_core::auth::CodecError;
use htun_core::crypto::SessionCipher;
use htun_core::framing::{decode_batch, encode_batch};
use htun_services::delivery::source_matches;
use htun_services::SessionState;

use super::{octet_stream, TunnelState};
use crate::auth::BasicAuth;
use crate::error::TunnelError;

pub async fn handle_data(
    State(state): State<TunnelState>,
    BasicAuth(creds): BasicAuth,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, TunnelError> {
    let ip: Ipv4Addr = creds
        .username
        .parse()
        .map_err(|_| CodecError::Encoding)?;
    let session = state.sessions.lookup(ip)?;

    let mut cipher = session.cipher.lock().await;
    // Replaced or swept while this request waited for the lock.
    if session.state() == SessionState::Expired {
        return Err(TunnelError::SessionExpired(ip));
    }

    // An unreadable or over-limit body is a failed exchange like any other.
    let result = body
        .map_err(TunnelError::from)
        .and_then(|body| exchange(&state, ip, &mut cipher, &body));
    match result {
        Ok(reply) => {
            session.touch(Instant::now());
            Ok(octet_stream(reply))
        }
        Err(e) => {
            state.sessions.teardown(&session, &e.to_string());
            Err(e)
        }
    }
}

fn exchange(
    state: &TunnelState,
    ip: Ipv4Addr,
    cipher: &mut SessionCipher,
    body: &[u8],
) -> Result<Bytes, TunnelError> {
    let mtu = state.settings.mtu as usize;

    let inbound = decode_batch(body, cipher, mtu)?;
    let received = inbound.len();
    let mut spoofed = 0usize;
    for packet in inbound {
        if source_matches(&packet, ip) {
            state.delivery.deliver(ip, packet);
        } else {
            spoofed += 1;
        }
    }
    if spoofed > 0 {
        tracing::debug!(%ip, spoofed, "dropped packets with foreign source address");
    }

    let mut outbound = state.delivery.drain(ip, state.settings.max_batch_packets);
    outbound.retain(|p| {
        let fits = p.len() <= mtu;
        if !fits {
            tracing::debug!(%ip, len = p.len(), mtu, "dropped oversize return packet");
        }
        fits
    });

    tracing::trace!(%ip, received, returned = outbound.len(), "batch exchanged");
    Ok(encode_batch(&outbound, cipher, mtu)?)
}
