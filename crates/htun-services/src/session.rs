//! Session management — tracks established tunnel sessions and the address
//! leases behind them.
//!
//! A session is keyed by the address leased to its client; that address is
//! what data-path requests carry as their username. Each client key holds at
//! most one lease. A repeat handshake from the same key reuses the lease and
//! replaces the session.
//!
//! Lifecycle: a lease is taken while the handshake runs, the session becomes
//! Active when the handshake completes, turns Expired on any data-path
//! failure, and is evicted (lease released, queued packets discarded) once it
//! has been idle for the configured timeout.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use htun_core::crypto::{key_fingerprint, PublicKey, SessionCipher};

use crate::delivery::PacketDelivery;
use crate::ip_allocator::{IpAllocator, LeaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Failed on the data path. Requests are refused; the lease is held
    /// until the sweeper evicts it.
    Expired,
}

/// Metadata about a session, fixed when the handshake completes.
#[derive(Debug)]
pub struct SessionMeta {
    /// Stable identifier derived from the handshake hash, identical on both sides.
    pub session_id: [u8; 32],
    pub client_pubkey: PublicKey,
    pub assigned_ip: Ipv4Addr,
    pub established_at: Instant,
}

#[derive(Debug)]
struct Activity {
    state: SessionState,
    last_activity: Instant,
}

/// An established session: transport cipher plus bookkeeping.
pub struct ActiveSession {
    pub meta: SessionMeta,
    /// Held for the whole of a data-path exchange; this serializes requests
    /// on one session and keeps the sweeper away from it.
    pub cipher: tokio::sync::Mutex<SessionCipher>,
    activity: Mutex<Activity>,
}

impl ActiveSession {
    pub fn new(meta: SessionMeta, cipher: SessionCipher) -> Self {
        let now = meta.established_at;
        Self {
            meta,
            cipher: tokio::sync::Mutex::new(cipher),
            activity: Mutex::new(Activity {
                state: SessionState::Active,
                last_activity: now,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.activity().state
    }

    pub fn last_activity(&self) -> Instant {
        self.activity().last_activity
    }

    /// Record a successful exchange.
    pub fn touch(&self, now: Instant) {
        let mut activity = self.activity();
        activity.last_activity = activity.last_activity.max(now);
    }

    /// Mark the session unusable. Returns true if it was Active.
    pub fn expire(&self) -> bool {
        let mut activity = self.activity();
        let was_active = activity.state == SessionState::Active;
        activity.state = SessionState::Expired;
        was_active
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("meta", &self.meta)
            .field("activity", &*self.activity())
            .finish_non_exhaustive()
    }
}

/// Which key holds which address. Leases exist from the start of a
/// handshake, before there is a session to attach them to.
#[derive(Debug)]
struct LeaseBook {
    allocator: IpAllocator,
    by_ip: HashMap<Ipv4Addr, PublicKey>,
    by_key: HashMap<PublicKey, Ipv4Addr>,
}

impl LeaseBook {
    fn record(&mut self, key: PublicKey, ip: Ipv4Addr) {
        self.by_ip.insert(ip, key);
        self.by_key.insert(key, ip);
    }

    fn release(&mut self, key: &PublicKey, ip: Ipv4Addr) {
        if self.by_ip.get(&ip) == Some(key) {
            self.by_ip.remove(&ip);
            self.by_key.remove(key);
            self.allocator.release(ip);
        }
    }
}

struct Inner {
    sessions: DashMap<Ipv4Addr, Arc<ActiveSession>>,
    leases: Mutex<LeaseBook>,
    delivery: Arc<dyn PacketDelivery>,
    idle_timeout: Duration,
    replaced: AtomicU64,
}

/// The session table, shared by request handlers and the sweeper.
#[derive(Clone)]
pub struct SessionTable {
    inner: Arc<Inner>,
}

impl SessionTable {
    pub fn new(
        allocator: IpAllocator,
        delivery: Arc<dyn PacketDelivery>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                leases: Mutex::new(LeaseBook {
                    allocator,
                    by_ip: HashMap::new(),
                    by_key: HashMap::new(),
                }),
                delivery,
                idle_timeout,
                replaced: AtomicU64::new(0),
            }),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Reserve an address for `key`. A key that already holds a lease gets
    /// the same address back.
    pub fn lease(&self, key: &PublicKey) -> Result<Ipv4Addr, SessionError> {
        let mut book = self.book();
        if let Some(ip) = book.by_key.get(key) {
            return Ok(*ip);
        }
        let ip = book.allocator.lease().inspect_err(|_| {
            tracing::warn!(client = %key_fingerprint(key), "address pool exhausted");
        })?;
        book.record(*key, ip);
        tracing::debug!(client = %key_fingerprint(key), %ip, "address leased");
        Ok(ip)
    }

    /// Give back a lease taken for a handshake that did not complete. Leases
    /// backing a live session are kept.
    pub fn release_unused(&self, key: &PublicKey, ip: Ipv4Addr) {
        let mut book = self.book();
        if self.inner.sessions.contains_key(&ip) {
            return;
        }
        book.release(key, ip);
    }

    /// Install the session for a finished handshake, replacing any previous
    /// session of the same key.
    pub fn complete(
        &self,
        key: PublicKey,
        ip: Ipv4Addr,
        cipher: SessionCipher,
    ) -> Result<Arc<ActiveSession>, SessionError> {
        let mut book = self.book();

        match book.by_ip.get(&ip).copied() {
            Some(owner) if owner == key => {}
            Some(_) => return Err(SessionError::LeaseLost(ip)),
            // Swept while the handshake was in flight.
            None => {
                if !book.allocator.claim(ip) {
                    return Err(SessionError::LeaseLost(ip));
                }
                if let Some(old_ip) = book.by_key.get(&key).copied() {
                    self.evict_locked(&mut book, &key, old_ip);
                }
                book.record(key, ip);
            }
        }

        let session = Arc::new(ActiveSession::new(
            SessionMeta {
                session_id: cipher.session_id,
                client_pubkey: key,
                assigned_ip: ip,
                established_at: Instant::now(),
            },
            cipher,
        ));

        self.inner.delivery.attach(ip);
        // IX message 1 carries no proof of possession of the client key, so
        // a captured message 1 replayed by anyone replaces the live session.
        if let Some(old) = self.inner.sessions.insert(ip, session.clone()) {
            let was_active = old.expire();
            let replaced = self.inner.replaced.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                client = %key_fingerprint(&key),
                %ip,
                old_session = %hex::encode(&old.meta.session_id[..8]),
                old_age_secs = old.meta.established_at.elapsed().as_secs(),
                old_idle_secs = old.last_activity().elapsed().as_secs(),
                was_active,
                replaced,
                "session replaced by new handshake"
            );
        }
        tracing::info!(
            client = %key_fingerprint(&key),
            %ip,
            session = %hex::encode(&session.meta.session_id[..8]),
            "session established"
        );
        Ok(session)
    }

    /// Sessions displaced by a repeat handshake since startup.
    pub fn replaced_count(&self) -> u64 {
        self.inner.replaced.load(Ordering::Relaxed)
    }

    /// Find the usable session for a leased address.
    pub fn lookup(&self, ip: Ipv4Addr) -> Result<Arc<ActiveSession>, SessionError> {
        let session = self
            .inner
            .sessions
            .get(&ip)
            .map(|s| s.value().clone())
            .ok_or(SessionError::NotFound(ip))?;
        match session.state() {
            SessionState::Active => Ok(session),
            SessionState::Expired => Err(SessionError::Expired(ip)),
        }
    }

    /// Expire a session after a data-path failure. The lease stays until the
    /// sweeper evicts it.
    pub fn teardown(&self, session: &ActiveSession, reason: &str) {
        if session.expire() {
            tracing::info!(
                ip = %session.meta.assigned_ip,
                session = %hex::encode(&session.meta.session_id[..8]),
                reason,
                "session torn down"
            );
        }
    }

    /// Evict every session idle for at least the timeout. Sessions in the
    /// middle of an exchange are skipped. Returns how many were evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut book = self.book();

        let candidates: Vec<Arc<ActiveSession>> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= self.inner.idle_timeout)
            .map(|entry| entry.value().clone())
            .collect();

        let mut evicted = 0;
        for session in candidates {
            let Ok(_busy) = session.cipher.try_lock() else {
                continue;
            };
            let ip = session.meta.assigned_ip;
            let removed = self
                .inner
                .sessions
                .remove_if(&ip, |_, current| Arc::ptr_eq(current, &session))
                .is_some();
            if !removed {
                continue;
            }
            session.expire();
            book.release(&session.meta.client_pubkey, ip);
            self.inner.delivery.forget(ip);
            evicted += 1;
            tracing::info!(
                client = %key_fingerprint(&session.meta.client_pubkey),
                %ip,
                "session evicted, address released"
            );
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) every `interval` until shutdown.
    pub async fn sweep_loop(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("session sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let evicted = self.sweep(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "sweep finished");
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn leased_count(&self) -> usize {
        self.book().allocator.leased_count()
    }

    /// Address currently leased to `key`, if any.
    pub fn lease_of(&self, key: &PublicKey) -> Option<Ipv4Addr> {
        self.book().by_key.get(key).copied()
    }

    fn evict_locked(&self, book: &mut LeaseBook, key: &PublicKey, ip: Ipv4Addr) {
        if let Some((_, old)) = self.inner.sessions.remove(&ip) {
            old.expire();
        }
        book.release(key, ip);
        self.inner.delivery.forget(ip);
    }

    fn book(&self) -> MutexGuard<'_, LeaseBook> {
        self.inner.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for {0}")]
    NotFound(Ipv4Addr),

    #[error("session for {0} has expired")]
    Expired(Ipv4Addr),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("lease on {0} was lost during the handshake")]
    LeaseLost(Ipv4Addr),
}
