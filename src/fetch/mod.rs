//! HTTP byte sources for the real-time feed and the static archive.

mod basic;
mod source;
pub mod auth;

pub use basic::BasicClient;
pub use source::{ByteSource, HttpClient, HttpSource};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::DownloadError;

/// GETs `url` and returns the body, rejecting non-success statuses and
/// bodies larger than `max_bytes`.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    max_bytes: u64,
) -> Result<Bytes, DownloadError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            status: status.as_u16(),
        });
    }

    if let Some(len) = resp.content_length()
        && len > max_bytes
    {
        return Err(DownloadError::TooLarge {
            size: len,
            limit: max_bytes,
        });
    }

    let body = resp.bytes().await?;
    let size = body.len() as u64;
    if size > max_bytes {
        return Err(DownloadError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    debug!(url, bytes = size, "Fetched response body");
    Ok(body)
}

/// Builds the shared HTTP client, adding the `x-api-key` header when a key
/// is configured.
pub fn http_client(
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn HttpClient>, DownloadError> {
    let basic = BasicClient::new(timeout)?;
    Ok(match api_key {
        Some(key) => Arc::new(auth::ApiKey::x_api_key(basic, key)?),
        None => Arc::new(basic),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_unparseable_url() {
        let client = BasicClient::new(Duration::from_secs(1)).unwrap();
        let result = fetch_bytes(&client, "not a url", 1024).await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn builds_client_with_and_without_key() {
        assert!(http_client(None, Duration::from_secs(5)).is_ok());
        assert!(http_client(Some("key"), Duration::from_secs(5)).is_ok());
        assert!(http_client(Some("bad\nkey"), Duration::from_secs(5)).is_err());
    }
}
