//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result, bail};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use htun_core::auth::BasicCredentials;

/// GET with Basic-Auth, returning the raw body of a 200.
pub async fn get_bytes(
    client: &reqwest::Client,
    url: &str,
    creds: &BasicCredentials,
) -> Result<Vec<u8>> {
    let resp = client
        .get(url)
        .header(AUTHORIZATION, creds.to_header())
        .send()
        .await
        .with_context(|| format!("failed to connect to htund at {url}"))?;
    read_ok(resp, url).await
}

/// POST a binary body with Basic-Auth, returning the raw body of a 200.
pub async fn post_bytes(
    client: &reqwest::Client,
    url: &str,
    creds: &BasicCredentials,
    body: Vec<u8>,
) -> Result<Vec<u8>> {
    let resp = client
        .post(url)
        .header(AUTHORIZATION, creds.to_header())
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to htund at {url}"))?;
    read_ok(resp, url).await
}

async fn read_ok(resp: reqwest::Response, url: &str) -> Result<Vec<u8>> {
    let status = resp.status();
    if !status.is_success() {
        bail!("{url} answered {status}");
    }
    let body = resp.bytes().await.context("failed to read response body")?;
    Ok(body.to_vec())
}
