//! HTTP fetch of GTFS-Realtime feeds.
//!
//! Clients compose: a [`BasicClient`] wrapped by the auth layer a feed's
//! configuration asks for. No retries happen here; a failed fetch is
//! reported to the caller and the next ingest tries again.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use crate::config::{FeedAuth, FeedConfig};
use anyhow::Result;
use auth::{ApiKey, UrlParam};
use bytes::Bytes;
use tracing::warn;

pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}

/// Builds the client a feed needs, reading its API key from the
/// environment variable the feed names. When the variable is unset or
/// empty the feed is fetched without a key.
pub fn client_for(feed: &FeedConfig) -> Result<Box<dyn HttpClient>> {
    let basic = BasicClient::new();
    let client: Box<dyn HttpClient> = match &feed.auth {
        FeedAuth::None => Box::new(basic),
        FeedAuth::Header {
            header_name,
            key_env,
        } => match read_key(key_env, &feed.url) {
            Some(key) => Box::new(ApiKey::new(basic, header_name, &key)?),
            None => Box::new(basic),
        },
        FeedAuth::UrlParam {
            param_name,
            key_env,
        } => match read_key(key_env, &feed.url) {
            Some(key) => Box::new(UrlParam::new(basic, param_name, key)),
            None => Box::new(basic),
        },
    };
    Ok(client)
}

fn read_key(key_env: &str, url: &str) -> Option<String> {
    let key = std::env::var(key_env).ok().filter(|k| !k.trim().is_empty());
    if key.is_none() {
        warn!(key_env, url, "API key variable not set, fetching without a key");
    }
    key
}
