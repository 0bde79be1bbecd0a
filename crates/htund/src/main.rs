//! htund — HTTP tunnel daemon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

use htun_api::{TunnelSettings, TunnelState};
use htun_core::config::HtunConfig;
use htun_core::crypto::key_fingerprint;
use htun_core::packet::ipv4_endpoints;
use htun_services::{ClientRegistry, IpAllocator, PacketQueues, SessionTable};

/// Capacity of the channel carrying traffic that leaves the tunnel subnet.
const UPLINK_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    match HtunConfig::write_default_if_missing() {
        Ok(path) => tracing::debug!(path = %path.display(), "config file"),
        Err(e) => tracing::warn!(error = %e, "failed to write default config"),
    }
    let config = HtunConfig::load().context("failed to load config")?;
    config.validate().context("invalid configuration")?;

    // Keypair
    let keypair = Arc::new(config.server_keypair()?);
    if config.identity.private_key.is_empty() {
        tracing::warn!("no identity.private_key configured, using an ephemeral key");
    }
    tracing::info!(public_key = hex::encode(keypair.public), "server keypair ready");

    let registry = ClientRegistry::new(config.client_keys()?);
    if registry.is_empty() {
        tracing::warn!("no client keys configured, every handshake will be refused");
    }

    // Shared state
    let subnet = config.network.subnet.trunc();
    let server_ip = config
        .network
        .server_address()
        .context("subnet has no host addresses")?;
    let (uplink_tx, uplink_rx) = mpsc::channel::<Bytes>(UPLINK_CAPACITY);
    let queues = Arc::new(
        PacketQueues::new(subnet, config.sessions.queue_depth).with_uplink(uplink_tx),
    );
    let sessions = SessionTable::new(
        IpAllocator::new(subnet, server_ip),
        queues.clone(),
        config.sessions.idle_timeout(),
    );

    tracing::info!(
        %subnet,
        %server_ip,
        mtu = config.network.mtu,
        clients = registry.len(),
        idle_timeout_secs = config.sessions.idle_timeout_secs,
        "htund starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let sweep_task = tokio::spawn(
        sessions
            .clone()
            .sweep_loop(config.sessions.sweep_interval(), shutdown_tx.subscribe()),
    );

    let uplinked = Arc::new(AtomicU64::new(0));
    let uplink_task = tokio::spawn(uplink_sink(uplink_rx, uplinked.clone()));

    let session_printer = {
        let sessions = sessions.clone();
        let queues = queues.clone();
        let uplinked = uplinked.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(
                    count = sessions.len(),
                    leased = sessions.leased_count(),
                    replaced = sessions.replaced_count(),
                    uplinked = uplinked.load(Ordering::Relaxed),
                    dropped = queues.dropped(),
                    "session table snapshot"
                );
            }
        })
    };

    let state = TunnelState {
        keypair: keypair.clone(),
        registry,
        sessions,
        delivery: queues,
        settings: TunnelSettings::from_config(&config),
    };
    let server_task = {
        let server = config.server.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { htun_api::serve(state, &server, shutdown).await })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = server_task         => match r {
            Ok(Ok(())) => tracing::info!("server stopped"),
            Ok(Err(e)) => return Err(e.context("tunnel server failed")),
            Err(e)     => tracing::error!("server task exited: {:?}", e),
        },
        r = sweep_task          => tracing::error!("sweep task exited: {:?}", r),
        r = uplink_task         => tracing::error!("uplink task exited: {:?}", r),
        r = session_printer     => tracing::error!("session printer exited: {:?}", r),
    }

    tracing::info!(server = %key_fingerprint(&keypair.public), "htund stopped");
    Ok(())
}

/// Consume traffic leaving the subnet. This daemon has no forwarder for it,
/// so packets are counted and logged at trace level.
async fn uplink_sink(mut rx: mpsc::Receiver<Bytes>, counter: Arc<AtomicU64>) {
    while let Some(packet) = rx.recv().await {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some((src, dst)) = ipv4_endpoints(&packet) {
            tracing::trace!(%src, %dst, len = packet.len(), "uplink packet");
        }
    }
}
