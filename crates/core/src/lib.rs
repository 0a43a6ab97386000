pub mod config;
pub mod debrid;
pub mod metrics;
pub mod naming;
pub mod store;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, CacheConfig, Config, ConfigError,
    DebridConfig, DebridService, RetryConfig, SanitizedConfig,
};
pub use debrid::{
    create_debrid_client, select_playable_file, AllDebridClient, CandidateFile, DebridClient,
    DebridError, DebridLinkClient, FileQuery, FileSelection, MediaKind, PackEntry,
    RealDebridClient, RetryPolicy, SelectedFile,
};
pub use store::{
    ActiveConnection, CacheStats, CachedDownloadLink, CachedMetadata, CachedTorrent,
    DebridAvailability, SearchGuard, SqliteStore, StoreError,
};
