//! GET {base}/auth — Noise IX handshake.
//!
//! Message 1 arrives split across the Basic-Auth fields. The response body
//! is message 2, whose encrypted payload is the client's `ClientSetting`.

use axum::extract::State;
use axum::response::Response;

use htun_core::auth::decode_handshake_message;
use htun_core::crypto::{key_fingerprint, NoiseResponder, PublicKey, ResponderPending};
use htun_core::ClientSetting;

use super::{octet_stream, TunnelState};
use crate::auth::BasicAuth;
use crate::error::TunnelError;

pub async fn handle_handshake(
    State(state): State<TunnelState>,
    BasicAuth(creds): BasicAuth,
) -> Result<Response, TunnelError> {
    let msg1 = decode_handshake_message(&creds.username, &creds.password)?;
    let pending = NoiseResponder::new(&state.keypair)?.read_init(&msg1)?;

    let client = *pending.remote_static();
    if !state.registry.is_authorized(&client) {
        return Err(TunnelError::Unauthorized(key_fingerprint(&client)));
    }

    let ip = state.sessions.lease(&client)?;
    let setting = ClientSetting {
        ip,
        subnet: state.settings.subnet,
        mtu: state.settings.mtu,
        dns_port: state.settings.dns_port,
    };

    match respond(&state, client, &setting, pending) {
        Ok(msg2) => Ok(octet_stream(msg2)),
        Err(e) => {
            state.sessions.release_unused(&client, ip);
            Err(e)
        }
    }
}

/// Write message 2 and install the session.
fn respond(
    state: &TunnelState,
    client: PublicKey,
    setting: &ClientSetting,
    pending: ResponderPending,
) -> Result<Vec<u8>, TunnelError> {
    let payload = setting.encode()?;
    let (msg2, cipher) = pending.finish(&payload)?;
    state.sessions.complete(client, setting.ip, cipher)?;
    Ok(msg2)
}
