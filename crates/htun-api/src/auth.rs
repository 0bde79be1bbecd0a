//! `Authorization: Basic` extraction.
//!
//! Both endpoints carry their identity in Basic-Auth: the handshake packs
//! Noise message 1 into it, the data path the leased address.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use htun_core::auth::{BasicCredentials, CodecError};

use crate::error::TunnelError;

/// Credentials from the request's `Authorization` header.
#[derive(Debug, Clone)]
pub struct BasicAuth(pub BasicCredentials);

impl<S> FromRequestParts<S> for BasicAuth
where
    S: Send + Sync,
{
    type Rejection = TunnelError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(CodecError::NotBasic)?;
        Ok(BasicAuth(BasicCredentials::from_header(value)?))
    }
}
