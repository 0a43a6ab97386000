//! Types and shared HTTP plumbing for debrid provider operations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DebridConfig;

/// Errors that can occur while talking to a debrid provider.
#[derive(Debug, Error)]
pub enum DebridError {
    /// Transport-level failure (DNS, connect, TLS, request timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered with an error status.
    #[error("Upstream error: HTTP {status}")]
    Upstream { status: u16 },

    /// The remote resource id is stale or was never valid. Not retryable;
    /// callers treat it as a miss (or as cleanup already done).
    #[error("Invalid remote reference: {0}")]
    InvalidReference(String),

    /// The provider reports the server's egress IP as blacklisted.
    #[error("Egress IP blocked by provider")]
    BlockedEgress,

    /// Response payload did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A deadline elapsed before the remote resource became ready.
    #[error("Timed out waiting for remote resource")]
    Timeout,

    /// All retry attempts were spent.
    #[error("Operation {op} unavailable after {attempts} attempts")]
    Exhausted { op: String, attempts: u32 },
}

impl DebridError {
    /// Transient failures are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            DebridError::Network(_) => true,
            DebridError::Upstream { status } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DebridError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DebridError::Upstream {
                status: status.as_u16(),
            },
            None => DebridError::Network(e.to_string()),
        }
    }
}

/// What kind of media a file lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Series,
}

/// Target of a file lookup: media kind plus the requested season/episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileQuery {
    pub kind: MediaKind,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Kitsu-style absolute numbering: the episode number counts from the
    /// start of the show and file names must not carry a season marker.
    pub kitsu: bool,
}

impl FileQuery {
    pub fn movie() -> Self {
        Self {
            kind: MediaKind::Movie,
            season: None,
            episode: None,
            kitsu: false,
        }
    }

    pub fn series(season: u32, episode: u32) -> Self {
        Self {
            kind: MediaKind::Series,
            season: Some(season),
            episode: Some(episode),
            kitsu: false,
        }
    }

    pub fn kitsu(episode: u32) -> Self {
        Self {
            kind: MediaKind::Series,
            season: None,
            episode: Some(episode),
            kitsu: true,
        }
    }
}

/// A provider-side file chosen for a hash: which file to unlock, and what it
/// is. `index` is provider-specific (a file id for Real-Debrid, a positional
/// index elsewhere) and is passed back verbatim to `generate_download_link`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSelection {
    pub index: String,
    pub title: String,
    pub size: u64,
}

/// Trait for debrid provider backends.
///
/// The three operations form the capability contract the search pipeline
/// relies on. They are deliberately infallible at this boundary: failures are
/// logged inside the backend and collapse to `false`, an absent map entry, or
/// `None`. Internals propagate `DebridError` through the retry executor.
/// Callers that need a hard bound on total latency should wrap calls in
/// `tokio::time::timeout`.
#[async_trait]
pub trait DebridClient: Send + Sync {
    /// Backend name for logging/metrics.
    fn name(&self) -> &str;

    /// Whether the configured account is premium. Advisory: any failure
    /// yields `false`, never an error.
    async fn check_premium(&self) -> bool;

    /// Resolve each hash to its best-matching playable file.
    ///
    /// Hashes that yield no match (or fail) are absent from the result. The
    /// map's iteration order is unspecified.
    async fn get_files(
        &self,
        hashes: &[String],
        query: &FileQuery,
    ) -> HashMap<String, FileSelection>;

    /// Unlock the file at `file_index` of `info_hash` into a direct URL.
    /// Returns `None` on any failure.
    async fn generate_download_link(&self, info_hash: &str, file_index: &str) -> Option<String>;
}

/// Chunk a hash list for bounded-concurrency processing.
pub(crate) fn chunk_hashes(hashes: &[String], chunk_size: usize) -> Vec<Vec<String>> {
    hashes
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Build a magnet URI from a bare info hash.
pub(crate) fn magnet_uri(info_hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{info_hash}")
}

/// Build the HTTP client a provider talks through: bearer auth, request
/// timeout from config, and optionally the egress proxy.
pub(crate) fn build_http(
    config: &DebridConfig,
    proxy: Option<&str>,
) -> Result<Client, DebridError> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| DebridError::Network(format!("Invalid API key header: {e}")))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let mut builder = Client::builder()
        .timeout(Duration::from_secs(u64::from(config.timeout_secs)))
        .default_headers(headers);

    if let Some(url) = proxy {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| DebridError::Network(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DebridError::Network(e.to_string()))
}

/// Deserialize a JSON response body, mapping error statuses and unparseable
/// payloads to the matching `DebridError` class.
pub(crate) async fn parse_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, DebridError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DebridError::Upstream {
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| DebridError::MalformedResponse(format!("{e}: {}", truncate(&body, 200))))
}

fn truncate(body: &str, limit: usize) -> String {
    if body.len() > limit {
        let cut: String = body.chars().take(limit).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DebridError::Network("connection reset".into()).is_transient());
        assert!(DebridError::Upstream { status: 503 }.is_transient());
        assert!(DebridError::Upstream { status: 500 }.is_transient());
        assert!(!DebridError::Upstream { status: 404 }.is_transient());
        assert!(!DebridError::InvalidReference("magnet 42".into()).is_transient());
        assert!(!DebridError::BlockedEgress.is_transient());
        assert!(!DebridError::MalformedResponse("not json".into()).is_transient());
        assert!(!DebridError::Timeout.is_transient());
    }

    #[test]
    fn test_file_query_constructors() {
        let movie = FileQuery::movie();
        assert_eq!(movie.kind, MediaKind::Movie);
        assert!(movie.season.is_none() && movie.episode.is_none());

        let series = FileQuery::series(1, 2);
        assert_eq!(series.kind, MediaKind::Series);
        assert_eq!(series.season, Some(1));
        assert_eq!(series.episode, Some(2));
        assert!(!series.kitsu);

        let kitsu = FileQuery::kitsu(12);
        assert!(kitsu.kitsu);
        assert!(kitsu.season.is_none());
        assert_eq!(kitsu.episode, Some(12));
    }

    #[test]
    fn test_chunk_hashes() {
        let hashes: Vec<String> = (0..30).map(|i| format!("hash{i}")).collect();
        let chunks = chunk_hashes(&hashes, 12);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 12);
        assert_eq!(chunks[1].len(), 12);
        assert_eq!(chunks[2].len(), 6);

        assert!(chunk_hashes(&[], 12).is_empty());
    }

    #[test]
    fn test_magnet_uri() {
        assert_eq!(
            magnet_uri("abc123"),
            "magnet:?xt=urn:btih:abc123".to_string()
        );
    }
}
