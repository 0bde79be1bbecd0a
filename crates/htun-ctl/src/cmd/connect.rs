//! `connect` — handshake with htund and exchange one batch.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};

use htun_core::client::{HandshakeStart, TunnelClient};
use htun_core::crypto::{Keypair, key_fingerprint, parse_key};
use htun_core::packet::{icmp_echo_request, ipv4_endpoints};

use super::http::{get_bytes, post_bytes};

pub struct ConnectArgs<'a> {
    /// Tunnel base URL, e.g. `http://vpn.example:8443/vpn`.
    pub url: &'a str,
    pub private_hex: &'a str,
    pub ping: Option<Ipv4Addr>,
    /// Expected server key; the connection is refused if it differs.
    pub server_key: Option<&'a str>,
}

pub async fn cmd_connect(args: ConnectArgs<'_>) -> Result<()> {
    let keypair = Keypair::from_hex(args.private_hex).context("private key must be 64 hex characters")?;
    let base = args.url.trim_end_matches('/');
    let http = reqwest::Client::new();

    // ── Handshake ────────────────────────────────────────────────────────────
    let start = HandshakeStart::new(&keypair)?;
    let msg2 = get_bytes(&http, &format!("{base}/auth"), start.credentials())
        .await
        .context("handshake refused")?;
    let mut tunnel = TunnelClient::complete(start, &msg2).context("handshake response invalid")?;

    if let Some(expected) = args.server_key {
        let expected = parse_key(expected).context("--server-key must be 64 hex characters")?;
        if *tunnel.server_public() != expected {
            bail!(
                "server key {} does not match --server-key",
                key_fingerprint(tunnel.server_public())
            );
        }
    }

    println!("server   : {}", hex::encode(tunnel.server_public()));
    println!("session  : {}", hex::encode(&tunnel.session_id()[..8]));
    println!("{}", serde_json::to_string_pretty(tunnel.setting())?);

    // ── One data exchange ────────────────────────────────────────────────────
    let mut packets = Vec::new();
    if let Some(dst) = args.ping {
        packets.push(icmp_echo_request(tunnel.setting().ip, dst, std::process::id() as u16, 1, b"htun-ctl"));
    }
    let body = tunnel.encode_batch(&packets)?;
    let reply = post_bytes(&http, &format!("{base}/"), &tunnel.data_credentials(), body.to_vec())
        .await
        .context("data exchange refused")?;
    let returned = tunnel.decode_batch(&reply)?;

    println!("sent {} packet(s), received {}", packets.len(), returned.len());
    for packet in &returned {
        match ipv4_endpoints(packet) {
            Some((src, dst)) => println!("  {src} -> {dst} ({} bytes)", packet.len()),
            None => println!("  non-IPv4 packet ({} bytes)", packet.len()),
        }
    }
    Ok(())
}
