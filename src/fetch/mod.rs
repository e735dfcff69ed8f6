mod basic;
mod client;
mod source;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use source::{FeedSource, FileFeed, HttpFeed};

use bytes::Bytes;
use tracing::debug;

use crate::error::TransportError;

/// Issues a GET for `url` and returns the response body.
///
/// Any status outside `2xx` is reported as [`TransportError::Status`].
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Bytes, TransportError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }

    let body = resp.bytes().await?;
    debug!(bytes = body.len(), "Feed body received");
    Ok(body)
}

/// True when `feed_url` parses as an absolute `http` or `https` URL.
fn is_http_url(feed_url: &str) -> bool {
    reqwest::Url::parse(feed_url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Builds the feed source described by `feed_url`, attaching `api_key` as
/// `placement` says. Anything that is not an `http(s)` URL is read from disk.
pub fn source_for(
    feed_url: &str,
    api_key: Option<&str>,
    placement: &crate::config::KeyPlacement,
) -> anyhow::Result<std::sync::Arc<dyn FeedSource>> {
    use crate::config::KeyPlacement;
    use std::sync::Arc;

    if !is_http_url(feed_url) {
        return Ok(Arc::new(FileFeed::new(feed_url)));
    }

    let client = BasicClient::new()?;
    let source: Arc<dyn FeedSource> = match (api_key, placement) {
        (None, _) => Arc::new(HttpFeed::new(client, feed_url)),
        (Some(key), KeyPlacement::Query { param }) => Arc::new(HttpFeed::new(
            auth::UrlParam {
                inner: client,
                param_name: param.clone(),
                key: key.to_string(),
            },
            feed_url,
        )),
        (Some(key), KeyPlacement::Header { name }) => Arc::new(HttpFeed::new(
            auth::ApiKey::new(client, name, key)?,
            feed_url,
        )),
    };
    Ok(source)
}
