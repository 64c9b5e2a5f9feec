use crate::error::DownloadError;
use crate::fetch::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header is validated once at construction so every request can be
/// sent without re-checking it.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, DownloadError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| DownloadError::InvalidHeader(e.to_string()))?;
        let mut value =
            HeaderValue::from_str(key).map_err(|e| DownloadError::InvalidHeader(e.to_string()))?;
        value.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// The `x-api-key` header used by the MTA developer endpoints.
    pub fn x_api_key(inner: C, key: &str) -> Result<Self, DownloadError> {
        Self::new(inner, "x-api-key", key)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use std::time::Duration;

    #[test]
    fn rejects_header_value_with_newline() {
        let inner = BasicClient::new(Duration::from_secs(1)).unwrap();
        let result = ApiKey::x_api_key(inner, "abc\ndef");
        assert!(matches!(result, Err(DownloadError::InvalidHeader(_))));
    }

    #[test]
    fn accepts_plain_key() {
        let inner = BasicClient::new(Duration::from_secs(1)).unwrap();
        assert!(ApiKey::x_api_key(inner, "secret-key").is_ok());
    }
}
