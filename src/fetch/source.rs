use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Request, Response};

use super::fetch_bytes;
use crate::error::DownloadError;

/// Executes a prepared request. Authentication wrappers implement this by
/// decorating an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// Supplies one response body per call: a real-time feed message or a
/// static archive. Transport and authentication live behind this trait.
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, DownloadError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// A [`ByteSource`] that GETs a fixed URL.
pub struct HttpSource {
    client: Arc<dyn HttpClient>,
    url: String,
    max_bytes: u64,
}

impl HttpSource {
    pub fn new(client: Arc<dyn HttpClient>, url: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            client,
            url: url.into(),
            max_bytes,
        }
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn fetch(&self) -> Result<Bytes, DownloadError> {
        fetch_bytes(self.client.as_ref(), &self.url, self.max_bytes).await
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
