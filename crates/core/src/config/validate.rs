use super::{Config, ConfigError};

/// Validate a loaded configuration beyond what serde can express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.debrid.api_key.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "debrid.api_key must not be empty".to_string(),
        ));
    }

    if config.debrid.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "debrid.timeout_secs must be positive".to_string(),
        ));
    }

    if config.debrid.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "debrid.retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if let Some(ref proxy) = config.debrid.proxy_url {
        let supported = proxy.starts_with("http://")
            || proxy.starts_with("https://")
            || proxy.starts_with("socks5://");
        if !supported {
            return Err(ConfigError::ValidationError(format!(
                "debrid.proxy_url has unsupported scheme: {proxy}"
            )));
        }
    }

    let ttls = [
        ("cache.torrent_ttl_secs", config.cache.torrent_ttl_secs),
        ("cache.debrid_ttl_secs", config.cache.debrid_ttl_secs),
        ("cache.metadata_ttl_secs", config.cache.metadata_ttl_secs),
        (
            "cache.download_link_ttl_secs",
            config.cache.download_link_ttl_secs,
        ),
        (
            "cache.search_lock_ttl_secs",
            config.cache.search_lock_ttl_secs,
        ),
    ];
    for (name, value) in ttls {
        if value <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be positive"
            )));
        }
    }

    Ok(())
}
