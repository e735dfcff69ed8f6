use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use super::client::HttpClient;
use super::fetch_bytes;
use crate::error::TransportError;

/// Where a poll cycle gets its raw feed payloads from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, TransportError>;

    /// Short human-readable label for logs. Must not leak credentials.
    fn describe(&self) -> String;
}

/// A live GTFS-RT endpoint reached over HTTP.
pub struct HttpFeed<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpFeed<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for HttpFeed<C> {
    async fn fetch(&self) -> Result<Bytes, TransportError> {
        fetch_bytes(&self.client, &self.url).await
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// A protobuf snapshot on local disk, re-read on every fetch.
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileFeed {
    async fn fetch(&self) -> Result<Bytes, TransportError> {
        let body = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(body))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
