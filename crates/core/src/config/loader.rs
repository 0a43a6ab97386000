use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
/// (`UNFETTER_DEBRID__API_KEY` overrides `debrid.api_key`, and so on).
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("UNFETTER_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebridService;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[debrid]
service = "real_debrid"
api_key = "rd-key"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.debrid.service, DebridService::RealDebrid);
        assert_eq!(config.debrid.api_key, "rd-key");
        assert_eq!(config.debrid.timeout_secs, 30);
        assert_eq!(config.debrid.retry.max_attempts, 3);
        assert_eq!(config.cache.torrent_ttl_secs, 1_296_000);
    }

    #[test]
    fn test_load_config_from_str_missing_debrid() {
        let toml = r#"
[cache]
torrent_ttl_secs = 60
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[debrid]
service = "debrid_link"
api_key = "dl-key"
proxy_url = "socks5://localhost:1080"

[cache]
path = "/tmp/unfetter-test.db"
download_link_ttl_secs = 600
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.debrid.service, DebridService::DebridLink);
        assert_eq!(
            config.debrid.proxy_url.as_deref(),
            Some("socks5://localhost:1080")
        );
        assert_eq!(config.cache.download_link_ttl_secs, 600);
    }
}
