//! Row types for the cache store tables.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current unix timestamp in seconds, the store's clock for TTL math.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// A resolved torrent for a media/season/episode combination.
///
/// Written by the search pipeline after provider resolution; read before
/// re-querying providers for the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTorrent {
    pub media_id: String,
    pub info_hash: String,
    pub file_index: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub title: Option<String>,
    pub seeders: Option<i64>,
    pub size: Option<i64>,
    pub tracker: Option<String>,
    /// Tracker/source URIs this hash was seen on.
    pub sources: Vec<String>,
    /// Parsed-metadata blob from the name parser, stored verbatim.
    pub parsed: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl CachedTorrent {
    pub fn new(media_id: impl Into<String>, info_hash: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            info_hash: info_hash.into(),
            file_index: None,
            season: None,
            episode: None,
            title: None,
            seeders: None,
            size: None,
            tracker: None,
            sources: Vec::new(),
            parsed: None,
            timestamp: now_ts(),
        }
    }
}

/// Whether a debrid service already has a hash cached, and which file of it
/// was selected. `file_index` is the provider-specific selector (a file id on
/// Real-Debrid, a position elsewhere), kept as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebridAvailability {
    pub service: String,
    pub info_hash: String,
    pub file_index: Option<String>,
    pub title: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub size: Option<i64>,
    pub parsed: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl DebridAvailability {
    pub fn new(service: impl Into<String>, info_hash: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            info_hash: info_hash.into(),
            file_index: None,
            title: None,
            season: None,
            episode: None,
            size: None,
            parsed: None,
            timestamp: now_ts(),
        }
    }
}

/// A resolved direct download link, keyed by the debrid account it was
/// unlocked with. Short-lived; cleared wholesale at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDownloadLink {
    pub debrid_key: String,
    pub info_hash: String,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub download_url: String,
    pub timestamp: i64,
}

impl CachedDownloadLink {
    pub fn new(
        debrid_key: impl Into<String>,
        info_hash: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            debrid_key: debrid_key.into(),
            info_hash: info_hash.into(),
            season: None,
            episode: None,
            download_url: download_url.into(),
            timestamp: now_ts(),
        }
    }
}

/// Upstream title-resolution result for a media id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMetadata {
    pub media_id: String,
    pub title: String,
    pub year: Option<i64>,
    pub year_end: Option<i64>,
    pub aliases: Vec<String>,
    pub timestamp: i64,
}

impl CachedMetadata {
    pub fn new(media_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            title: title.into(),
            year: None,
            year_end: None,
            aliases: Vec::new(),
            timestamp: now_ts(),
        }
    }
}

/// A currently-streaming session. Cleared wholesale at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub id: String,
    pub ip: String,
    pub content: String,
    pub timestamp: i64,
}

impl ActiveConnection {
    pub fn new(
        id: impl Into<String>,
        ip: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            content: content.into(),
            timestamp: now_ts(),
        }
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub torrents: u64,
    pub availability: u64,
    pub download_links: u64,
    pub metadata: u64,
    pub ongoing_searches: u64,
    pub active_connections: u64,
}
