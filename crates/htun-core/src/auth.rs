//! Handshake codec — Noise messages carried in HTTP Basic-Auth credentials.
//!
//! Wire format of a handshake request:
//!
//!   Authorization: Basic base64(username ":" password)
//!
//! where `username || password` is the Noise IX message 1 in URL-safe
//! base64 without padding. The alphabet never contains `:`, so the split
//! point is unambiguous. `username` takes the first half (rounded up).
//!
//! The field bound below caps the handshake message at 768 bytes, far above
//! the 64 bytes an IX message 1 actually needs and well under any proxy's
//! header limit.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use thiserror::Error;

/// Maximum characters in either credential field.
pub const MAX_FIELD_CHARS: usize = 512;

/// Largest handshake message the two fields can carry.
pub const MAX_HANDSHAKE_LEN: usize = MAX_FIELD_CHARS * 2 / 4 * 3;

/// Smallest valid IX message 1: ephemeral key plus static key, in clear.
pub const MIN_HANDSHAKE_LEN: usize = 64;

/// The (username, password) pair of a Basic-Auth header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse the value of an `Authorization` header.
    pub fn from_header(value: &str) -> Result<Self, CodecError> {
        let (scheme, token) = value.trim().split_once(' ').ok_or(CodecError::NotBasic)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(CodecError::NotBasic);
        }
        let decoded = STANDARD
            .decode(token.trim())
            .map_err(|_| CodecError::Encoding)?;
        let text = String::from_utf8(decoded).map_err(|_| CodecError::Encoding)?;
        let (username, password) = text.split_once(':').ok_or(CodecError::Encoding)?;
        Ok(Self::new(username, password))
    }

    /// Render as an `Authorization` header value.
    pub fn to_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

/// Encode a handshake message into Basic-Auth credentials.
pub fn encode_handshake_message(message: &[u8]) -> Result<BasicCredentials, CodecError> {
    if message.len() > MAX_HANDSHAKE_LEN {
        return Err(CodecError::TooLarge {
            len: message.len(),
            max: MAX_HANDSHAKE_LEN,
        });
    }
    let mut username = URL_SAFE_NO_PAD.encode(message);
    let split = username.len().div_ceil(2);
    let password = username.split_off(split);
    Ok(BasicCredentials { username, password })
}

/// Decode a handshake message from Basic-Auth credentials.
///
/// Only encoding and length are checked here; nothing reaches the Noise
/// engine unless this succeeds.
pub fn decode_handshake_message(username: &str, password: &str) -> Result<Vec<u8>, CodecError> {
    for field in [username, password] {
        if field.len() > MAX_FIELD_CHARS {
            return Err(CodecError::FieldTooLong);
        }
        if !field.bytes().all(is_url_safe_b64) {
            return Err(CodecError::Encoding);
        }
    }

    let mut joined = String::with_capacity(username.len() + password.len());
    joined.push_str(username);
    joined.push_str(password);
    let message = URL_SAFE_NO_PAD
        .decode(joined.as_bytes())
        .map_err(|_| CodecError::Encoding)?;

    if message.len() < MIN_HANDSHAKE_LEN {
        return Err(CodecError::TooShort(message.len()));
    }
    Ok(message)
}

fn is_url_safe_b64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("authorization scheme is not Basic")]
    NotBasic,

    #[error("malformed credential encoding")]
    Encoding,

    #[error("credential field exceeds {MAX_FIELD_CHARS} characters")]
    FieldTooLong,

    #[error("handshake message too short ({0} bytes)")]
    TooShort(usize),

    #[error("handshake message of {len} bytes exceeds the {max}-byte field capacity")]
    TooLarge { len: usize, max: usize },

    #[error("malformed client setting: {0}")]
    Setting(#[from] serde_json::Error),

    #[error("client setting address {0} lies outside its subnet")]
    AddressOutsideSubnet(std::net::Ipv4Addr),
}
