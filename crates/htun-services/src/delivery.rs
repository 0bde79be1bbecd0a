//! Packet delivery — where decrypted client packets go and where a client's
//! return traffic waits until its next request.
//!
//! The tunnel only sees traffic when a client polls, so every client has a
//! bounded queue. Packets addressed to another client inside the subnet are
//! switched straight into that client's queue; anything else is handed to the
//! uplink, if one is attached. Return traffic from the uplink comes back in
//! through [`PacketQueues::inject`].

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use ipnet::Ipv4Net;
use tokio::sync::mpsc;

use htun_core::packet::ipv4_endpoints;

/// The seam between the tunnel and whatever forwards its packets.
pub trait PacketDelivery: Send + Sync {
    /// Start buffering return traffic for a freshly leased address.
    fn attach(&self, ip: Ipv4Addr);

    /// Hand over one packet sent by the client holding `from`.
    fn deliver(&self, from: Ipv4Addr, packet: Bytes);

    /// Take up to `max` packets waiting for the client holding `ip`.
    fn drain(&self, ip: Ipv4Addr, max: usize) -> Vec<Bytes>;

    /// Drop everything held for `ip`. Called when its lease is released.
    fn forget(&self, ip: Ipv4Addr);
}

/// Whether a client packet really originates from the client's lease.
pub fn source_matches(packet: &[u8], ip: Ipv4Addr) -> bool {
    matches!(ipv4_endpoints(packet), Some((src, _)) if src == ip)
}

/// In-memory per-client queues with optional uplink.
#[derive(Clone)]
pub struct PacketQueues {
    queues: Arc<DashMap<Ipv4Addr, VecDeque<Bytes>>>,
    subnet: Ipv4Net,
    depth: usize,
    uplink: Option<mpsc::Sender<Bytes>>,
    dropped: Arc<AtomicU64>,
}

impl PacketQueues {
    pub fn new(subnet: Ipv4Net, depth: usize) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            subnet: subnet.trunc(),
            depth: depth.max(1),
            uplink: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send traffic leaving the subnet to `uplink`.
    pub fn with_uplink(mut self, uplink: mpsc::Sender<Bytes>) -> Self {
        self.uplink = Some(uplink);
        self
    }

    /// Queue a packet arriving from outside for the client it is addressed to.
    /// Returns false if nobody holds the destination.
    pub fn inject(&self, packet: Bytes) -> bool {
        let Some((_, dst)) = ipv4_endpoints(&packet) else {
            self.count_drop();
            return false;
        };
        self.enqueue(dst, packet)
    }

    /// Packets dropped so far: no route, full uplink, or queue overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queued(&self, ip: Ipv4Addr) -> usize {
        self.queues.get(&ip).map(|q| q.len()).unwrap_or(0)
    }

    fn enqueue(&self, dst: Ipv4Addr, packet: Bytes) -> bool {
        let Some(mut queue) = self.queues.get_mut(&dst) else {
            self.count_drop();
            return false;
        };
        if queue.len() >= self.depth {
            queue.pop_front();
            self.count_drop();
            tracing::trace!(%dst, "client queue full, dropped oldest packet");
        }
        queue.push_back(packet);
        true
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl PacketDelivery for PacketQueues {
    fn attach(&self, ip: Ipv4Addr) {
        self.queues.entry(ip).or_default();
    }

    fn deliver(&self, from: Ipv4Addr, packet: Bytes) {
        let Some((_, dst)) = ipv4_endpoints(&packet) else {
            self.count_drop();
            return;
        };

        if self.subnet.contains(&dst) && self.queues.contains_key(&dst) {
            tracing::trace!(%from, %dst, len = packet.len(), "switching packet inside subnet");
            self.enqueue(dst, packet);
            return;
        }

        match &self.uplink {
            Some(uplink) => {
                if uplink.try_send(packet).is_err() {
                    self.count_drop();
                    tracing::debug!(%from, %dst, "uplink full or closed, packet dropped");
                }
            }
            None => {
                self.count_drop();
                tracing::trace!(%from, %dst, "no route for packet");
            }
        }
    }

    fn drain(&self, ip: Ipv4Addr, max: usize) -> Vec<Bytes> {
        match self.queues.get_mut(&ip) {
            Some(mut queue) => {
                let n = queue.len().min(max);
                queue.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    fn forget(&self, ip: Ipv4Addr) {
        if let Some((_, queue)) = self.queues.remove(&ip) {
            if !queue.is_empty() {
                tracing::debug!(%ip, discarded = queue.len(), "discarding queued packets");
            }
        }
    }
}
