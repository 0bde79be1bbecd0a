//! Tunnel errors and how they reach the wire.
//!
//! Every failure answers with the same bare 401 so a remote peer cannot
//! tell which check failed. The cause is only logged.

use std::net::Ipv4Addr;

use axum::extract::rejection::BytesRejection;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use htun_core::auth::CodecError;
use htun_core::crypto::CryptoError;
use htun_core::framing::FramingError;
use htun_services::{LeaseError, SessionError};

/// Challenge sent with every 401.
pub const AUTH_CHALLENGE: &str = "Basic realm=\"htun\"";

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("malformed credentials: {0}")]
    Encoding(#[from] CodecError),

    #[error("noise failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("client {0} is not registered")]
    Unauthorized(String),

    #[error(transparent)]
    LeaseExhausted(LeaseError),

    #[error("no session for {0}")]
    SessionNotFound(Ipv4Addr),

    #[error("session for {0} has expired")]
    SessionExpired(Ipv4Addr),

    #[error("packet of {len} bytes exceeds MTU {mtu}")]
    Oversize { len: usize, mtu: usize },

    #[error("malformed batch: {0}")]
    Body(FramingError),

    #[error("unreadable body: {0}")]
    Unreadable(#[from] BytesRejection),
}

impl From<SessionError> for TunnelError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(ip) => TunnelError::SessionNotFound(ip),
            SessionError::Expired(ip) => TunnelError::SessionExpired(ip),
            SessionError::Lease(e) => TunnelError::LeaseExhausted(e),
            SessionError::LeaseLost(ip) => TunnelError::SessionNotFound(ip),
        }
    }
}

impl From<FramingError> for TunnelError {
    fn from(e: FramingError) -> Self {
        match e {
            FramingError::Oversize { len, mtu } => TunnelError::Oversize { len, mtu },
            FramingError::Crypto(e) => TunnelError::Crypto(e),
            other => TunnelError::Body(other),
        }
    }
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        match &self {
            TunnelError::LeaseExhausted(_) => tracing::warn!(error = %self, "request refused"),
            TunnelError::Unauthorized(_) => tracing::info!(error = %self, "request refused"),
            _ => tracing::debug!(error = %self, "request refused"),
        }
        unauthorized()
    }
}

/// The one response a failing request ever gets.
pub fn unauthorized() -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_CHALLENGE));
    response
}
