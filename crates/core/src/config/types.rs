use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub debrid: DebridConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Supported debrid services.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DebridService {
    RealDebrid,
    AllDebrid,
    DebridLink,
}

impl DebridService {
    /// Returns the string representation used in logs, metrics and the
    /// `debrid_availability` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            DebridService::RealDebrid => "realdebrid",
            DebridService::AllDebrid => "alldebrid",
            DebridService::DebridLink => "debridlink",
        }
    }
}

/// Debrid provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebridConfig {
    /// Which backend to use.
    pub service: DebridService,
    /// Account API key, sent as a bearer token.
    pub api_key: String,
    /// Egress proxy to switch to when the provider blacklists the server's
    /// IP (e.g. "socks5://warp:1080"). Optional; without it blocked calls
    /// proceed unproxied.
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Client IP forwarded to providers that support it (Real-Debrid), so
    /// links are generated for the end user rather than the server.
    #[serde(default)]
    pub client_ip: Option<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    /// How long to wait for a seedbox-style job to become ready before
    /// giving up (default: 60)
    #[serde(default = "default_seedbox_ready_timeout")]
    pub seedbox_ready_timeout_secs: u64,
}

fn default_timeout() -> u32 {
    30
}

fn default_seedbox_ready_timeout() -> u64 {
    60
}

/// Retry budget for provider calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Cache store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// TTL for cached torrent resolutions and first-search markers.
    #[serde(default = "default_torrent_ttl")]
    pub torrent_ttl_secs: i64,
    /// TTL for debrid availability records.
    #[serde(default = "default_debrid_ttl")]
    pub debrid_ttl_secs: i64,
    /// TTL for upstream metadata.
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_secs: i64,
    /// TTL for resolved download links.
    #[serde(default = "default_download_link_ttl")]
    pub download_link_ttl_secs: i64,
    /// After this long an unreleased ongoing-search marker is reclaimable.
    #[serde(default = "default_search_lock_ttl")]
    pub search_lock_ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            torrent_ttl_secs: default_torrent_ttl(),
            debrid_ttl_secs: default_debrid_ttl(),
            metadata_ttl_secs: default_metadata_ttl(),
            download_link_ttl_secs: default_download_link_ttl(),
            search_lock_ttl_secs: default_search_lock_ttl(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("unfetter.db")
}

fn default_torrent_ttl() -> i64 {
    1_296_000 // 15 days
}

fn default_debrid_ttl() -> i64 {
    86_400 // 1 day
}

fn default_metadata_ttl() -> i64 {
    2_592_000 // 30 days
}

fn default_download_link_ttl() -> i64 {
    3_600 // 1 hour
}

fn default_search_lock_ttl() -> i64 {
    60
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub service: String,
    pub api_key_configured: bool,
    pub proxy_configured: bool,
    pub timeout_secs: u32,
    pub cache: CacheConfig,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            service: config.debrid.service.as_str().to_string(),
            api_key_configured: !config.debrid.api_key.is_empty(),
            proxy_configured: config.debrid.proxy_url.is_some(),
            timeout_secs: config.debrid.timeout_secs,
            cache: config.cache.clone(),
        }
    }
}
