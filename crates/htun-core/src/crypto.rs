//! Cryptographic primitives for htun.
//!
//! Provides three things:
//!   1. Static X25519 keypairs: the long-term identity of the server and
//!      of every permitted client.
//!   2. Noise_IX session establishment: one round trip, both static keys
//!      exchanged, mutual authentication.
//!   3. `SessionCipher`: the post-handshake transport with explicit,
//!      monotonic nonce counters per direction.
//!
//! Keypairs are managed via x25519-dalek for explicit key control.
//! snow drives the Noise_IX state machine using those keys.
//!
//! Every snow call that touches bytes from the network runs under
//! `catch_unwind`, so a fault inside the Noise engine surfaces as a
//! `CryptoError` instead of unwinding through a request handler.

use std::panic::{catch_unwind, AssertUnwindSafe};

use snow::{Builder, HandshakeState, StatelessTransportState};
use thiserror::Error;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// The Noise protocol pattern htun uses.
///
/// Noise_IX: the initiator sends its static key in message 1, the responder
/// answers with its own in message 2. One HTTP round trip is enough.
const NOISE_PATTERN: &str = "Noise_IX_25519_AESGCM_SHA256";

/// Prologue mixed into every handshake. Both sides must agree on it.
pub const PROLOGUE: &[u8] = b"htun/noise-ix/1";

/// Largest Noise message, handshake or transport.
pub const MAX_NOISE_MESSAGE: usize = 65535;

/// AEAD tag appended to every encrypted Noise payload.
pub const TAG_LEN: usize = 16;

/// A 32-byte X25519 public key.
pub type PublicKey = [u8; 32];

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive the diagnostic session ID from the Noise handshake hash.
///
/// Both sides compute the same value without exchanging it.
pub fn derive_session_id(handshake_hash: &[u8]) -> [u8; 32] {
    hash(handshake_hash)
}

/// Short printable form of a key for log fields.
pub fn key_fingerprint(key: &PublicKey) -> String {
    hex::encode(&key[..8])
}

/// Parse a hex-encoded 32-byte key.
pub fn parse_key(hex_str: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| CryptoError::InvalidKey)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidKey)
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A long-term static X25519 keypair.
///
/// The server holds one; every client holds one whose public half is listed
/// in the server's registry. The private key never leaves this struct.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    /// Zeroized on drop, never exposed directly.
    private: Zeroizing<[u8; 32]>,
    /// Sent in clear inside Noise message 1 (client) or
    /// encrypted inside message 2 (server).
    pub public: PublicKey,
}

impl Keypair {
    /// Generate a new random X25519 keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = DalekPublic::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = DalekPublic::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct a keypair from a hex-encoded private key.
    pub fn from_hex(private_hex: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(parse_key(private_hex)?);
        Ok(Self::from_private(*bytes))
    }

    /// Serialize the private key for persistent storage.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    /// Hex form of the private key, for config files.
    pub fn private_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(*self.private))
    }
}

// ── Panic guard ───────────────────────────────────────────────────────────────

/// Run a snow operation, converting both its error and any panic.
fn guarded<T>(op: impl FnOnce() -> Result<T, snow::Error>) -> Result<T, CryptoError> {
    match catch_unwind(AssertUnwindSafe(op)) {
        Ok(result) => result.map_err(CryptoError::Noise),
        Err(_) => Err(CryptoError::Panicked),
    }
}

fn into_cipher(state: HandshakeState) -> Result<SessionCipher, CryptoError> {
    let session_id = derive_session_id(state.get_handshake_hash());
    let remote_static: PublicKey = state
        .get_remote_static()
        .ok_or(CryptoError::MissingRemoteStatic)?
        .try_into()
        .map_err(|_| CryptoError::MissingRemoteStatic)?;
    let transport = guarded(move || state.into_stateless_transport_mode())?;

    Ok(SessionCipher {
        session_id,
        remote_static,
        transport,
        send: NonceCounter::new(),
        recv: NonceCounter::new(),
    })
}

// ── Noise Handshake ───────────────────────────────────────────────────────────

/// Initiator (client) side of the Noise_IX handshake.
///
/// Writes message 1 on construction, then consumes the server's message 2
/// and yields the payload the server attached plus a ready `SessionCipher`.
pub struct NoiseInitiator {
    state: HandshakeState,
}

impl NoiseInitiator {
    /// Begin a handshake as the initiator.
    ///
    /// Returns the initiator state and the bytes of message 1.
    pub fn new(keypair: &Keypair) -> Result<(Self, Vec<u8>), CryptoError> {
        let mut state = Builder::new(NOISE_PATTERN.parse().map_err(|_| CryptoError::BadPattern)?)
            .local_private_key(&*keypair.private)
            .prologue(PROLOGUE)
            .build_initiator()
            .map_err(CryptoError::Noise)?;

        let mut msg1 = vec![0u8; MAX_NOISE_MESSAGE];
        let len = guarded(|| state.write_message(&[], &mut msg1))?;
        msg1.truncate(len);

        Ok((Self { state }, msg1))
    }

    /// Process the responder's message 2 and complete the handshake.
    ///
    /// Returns the decrypted payload the responder attached and the
    /// transport cipher for the data path.
    pub fn finish(mut self, msg2: &[u8]) -> Result<(Vec<u8>, SessionCipher), CryptoError> {
        let mut payload = vec![0u8; msg2.len()];
        let len = guarded(|| self.state.read_message(msg2, &mut payload))?;
        payload.truncate(len);

        let cipher = into_cipher(self.state)?;
        Ok((payload, cipher))
    }
}

/// Responder (server) side of the Noise_IX handshake.
pub struct NoiseResponder {
    state: HandshakeState,
}

impl NoiseResponder {
    /// Begin a handshake as the responder.
    pub fn new(keypair: &Keypair) -> Result<Self, CryptoError> {
        let state = Builder::new(NOISE_PATTERN.parse().map_err(|_| CryptoError::BadPattern)?)
            .local_private_key(&*keypair.private)
            .prologue(PROLOGUE)
            .build_responder()
            .map_err(CryptoError::Noise)?;
        Ok(Self { state })
    }

    /// Process the initiator's message 1.
    ///
    /// Afterwards the initiator's static key is known, so the caller can
    /// authorize it before committing to message 2. Any payload carried
    /// in message 1 is ignored.
    pub fn read_init(mut self, msg1: &[u8]) -> Result<ResponderPending, CryptoError> {
        let mut payload = vec![0u8; msg1.len()];
        guarded(|| self.state.read_message(msg1, &mut payload))?;

        let remote_static: PublicKey = self
            .state
            .get_remote_static()
            .ok_or(CryptoError::MissingRemoteStatic)?
            .try_into()
            .map_err(|_| CryptoError::MissingRemoteStatic)?;

        Ok(ResponderPending {
            state: self.state,
            remote_static,
        })
    }
}

/// Responder that has read message 1 and is about to write message 2.
pub struct ResponderPending {
    state: HandshakeState,
    remote_static: PublicKey,
}

impl ResponderPending {
    /// The initiator's static public key, as transmitted in message 1.
    pub fn remote_static(&self) -> &PublicKey {
        &self.remote_static
    }

    /// Write message 2 carrying `payload` (encrypted) and complete the
    /// handshake.
    pub fn finish(mut self, payload: &[u8]) -> Result<(Vec<u8>, SessionCipher), CryptoError> {
        let mut msg2 = vec![0u8; MAX_NOISE_MESSAGE];
        let len = guarded(|| self.state.write_message(payload, &mut msg2))?;
        msg2.truncate(len);

        let cipher = into_cipher(self.state)?;
        Ok((msg2, cipher))
    }
}

// ── Nonce Counter ─────────────────────────────────────────────────────────────

/// Explicit per-direction Noise nonce.
///
/// Counters only move forward. `advance` hands out the current value
/// together with the successor; the caller decides when to commit the
/// successor. `u64::MAX` is reserved by Noise and never handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct NonceCounter(u64);

impl NonceCounter {
    pub const fn new() -> Self {
        Self(0)
    }

    /// Number of messages already sealed or opened in this direction.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns (nonce to use now, counter after use).
    pub fn advance(self) -> Result<(u64, NonceCounter), CryptoError> {
        if self.0 == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        Ok((self.0, NonceCounter(self.0 + 1)))
    }

    #[cfg(test)]
    pub(crate) fn starting_at(value: u64) -> Self {
        Self(value)
    }
}

// ── Session Cipher ────────────────────────────────────────────────────────────

/// A completed Noise_IX session, ready for batch encryption and decryption.
///
/// Uses StatelessTransportState with counters kept here rather than inside
/// snow. Nonces are implicit on the wire: each HTTP exchange is strictly
/// ordered, so the n-th message in a direction always uses nonce n.
///
/// Both counters require exclusive access; share it behind a mutex.
pub struct SessionCipher {
    pub session_id: [u8; 32],
    remote_static: PublicKey,
    transport: StatelessTransportState,
    send: NonceCounter,
    recv: NonceCounter,
}

impl SessionCipher {
    /// The peer's static public key, as authenticated by the handshake.
    pub fn remote_static(&self) -> &PublicKey {
        &self.remote_static
    }

    pub fn send_counter(&self) -> NonceCounter {
        self.send
    }

    pub fn recv_counter(&self) -> NonceCounter {
        self.recv
    }

    /// Seal `plaintext` with the nonce taken from `counter`, writing the
    /// ciphertext (payload + 16-byte tag) into `out`.
    ///
    /// Does not touch the committed send counter; returns its successor.
    pub fn seal_at(
        &self,
        counter: NonceCounter,
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<NonceCounter, CryptoError> {
        if plaintext.len() + TAG_LEN > MAX_NOISE_MESSAGE {
            return Err(CryptoError::TooLong);
        }
        let (nonce, next) = counter.advance()?;

        out.clear();
        out.resize(plaintext.len() + TAG_LEN, 0);
        let written = guarded(|| self.transport.write_message(nonce, plaintext, &mut out[..]))?;
        out.truncate(written);
        Ok(next)
    }

    /// Open `ciphertext` with the nonce taken from `counter`, writing the
    /// plaintext into `out`.
    ///
    /// Does not touch the committed receive counter; returns its successor.
    pub fn open_at(
        &self,
        counter: NonceCounter,
        ciphertext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<NonceCounter, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce, next) = counter.advance()?;

        out.clear();
        out.resize(ciphertext.len(), 0);
        let written = guarded(|| self.transport.read_message(nonce, ciphertext, &mut out[..]))?;
        out.truncate(written);
        Ok(next)
    }

    /// Commit the send counter after a whole batch was sealed.
    pub fn commit_send(&mut self, next: NonceCounter) {
        debug_assert!(next >= self.send, "send counter must not move backwards");
        self.send = self.send.max(next);
    }

    /// Commit the receive counter after a whole batch was authenticated.
    pub fn commit_recv(&mut self, next: NonceCounter) {
        debug_assert!(next >= self.recv, "recv counter must not move backwards");
        self.recv = self.recv.max(next);
    }

    /// Seal a single message and commit the send counter.
    pub fn encrypt(&mut self, plaintext: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let next = self.seal_at(self.send, plaintext, out)?;
        self.send = next;
        Ok(())
    }

    /// Open a single message and commit the receive counter on success.
    pub fn decrypt(&mut self, ciphertext: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let next = self.open_at(self.recv, ciphertext, out)?;
        self.recv = next;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_counters(&mut self, send: NonceCounter, recv: NonceCounter) {
        self.send = send;
        self.recv = recv;
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("session_id", &hex::encode(&self.session_id[..8]))
            .field("send", &self.send)
            .field("recv", &self.recv)
            .finish_non_exhaustive()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid Noise pattern string")]
    BadPattern,

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("Noise engine panicked on input")]
    Panicked,

    #[error("handshake finished without a remote static key")]
    MissingRemoteStatic,

    #[error("ciphertext too short (need at least 16 bytes for the tag)")]
    TooShort,

    #[error("plaintext does not fit in one Noise message")]
    TooLong,

    #[error("nonce space exhausted, session must re-handshake")]
    NonceExhausted,

    #[error("key must be 32 bytes of hex")]
    InvalidKey,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
