//! SQLite-backed cache store implementation.

use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::metrics;

use super::{
    ActiveConnection, CacheStats, CachedDownloadLink, CachedMetadata, CachedTorrent,
    DebridAvailability, StoreError,
};
use super::types::now_ts;

/// Bumped when the schema changes shape; a mismatch rebuilds every table.
const DATABASE_VERSION: &str = "1.0";

/// SQLite-backed cache store.
///
/// One instance per process; many processes may share the database file (WAL
/// journal plus a generous busy timeout). Startup is fatal on error: a
/// process must not serve with an unusable cache.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    config: CacheConfig,
}

impl SqliteStore {
    /// Open (or create) the store at the configured path and run the startup
    /// sequence: pragmas, version check, schema, expiry purge, volatile-table
    /// sweep.
    pub fn open(config: CacheConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.path)?;
        Self::startup(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Create an in-memory store with default TTLs (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::in_memory_with(CacheConfig::default())
    }

    /// Create an in-memory store with specific TTLs (useful for testing).
    pub fn in_memory_with(config: CacheConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::startup(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    fn startup(conn: &Connection, config: &CacheConfig) -> Result<(), StoreError> {
        Self::apply_pragmas(conn)?;
        Self::check_version(conn)?;
        Self::initialize_schema(conn)?;
        Self::purge_expired_on(conn, config)?;

        // Volatile state from previous runs is meaningless now.
        conn.execute_batch(
            "DELETE FROM ongoing_searches;
             DELETE FROM download_links_cache;
             DELETE FROM active_connections;",
        )?;

        Ok(())
    }

    fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
        conn.busy_timeout(Duration::from_secs(30))?;
        // journal_mode answers with the resulting mode, so it can't go
        // through execute_batch.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "PRAGMA synchronous = OFF;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = OFF;
             PRAGMA secure_delete = OFF;",
        )?;
        Ok(())
    }

    fn check_version(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS db_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version TEXT
            )",
            [],
        )?;

        let current: Option<String> = conn
            .query_row("SELECT version FROM db_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if current.as_deref() != Some(DATABASE_VERSION) {
            info!(
                from = current.as_deref().unwrap_or("none"),
                to = DATABASE_VERSION,
                "Cache schema version changed, rebuilding tables"
            );

            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT IN ('db_version', 'sqlite_sequence')",
            )?;
            let tables: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<_, _>>()?;
            drop(stmt);

            for table in tables {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
            }

            conn.execute(
                "INSERT INTO db_version (id, version) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET version = excluded.version",
                params![DATABASE_VERSION],
            )?;
        }

        Ok(())
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ongoing_searches (
                media_id TEXT PRIMARY KEY,
                timestamp INTEGER
            );

            CREATE TABLE IF NOT EXISTS first_searches (
                media_id TEXT PRIMARY KEY,
                timestamp INTEGER
            );

            CREATE TABLE IF NOT EXISTS metadata_cache (
                media_id TEXT PRIMARY KEY,
                title TEXT,
                year INTEGER,
                year_end INTEGER,
                aliases TEXT,
                timestamp INTEGER
            );

            CREATE TABLE IF NOT EXISTS torrents (
                media_id TEXT,
                info_hash TEXT,
                file_index INTEGER,
                season INTEGER,
                episode INTEGER,
                title TEXT,
                seeders INTEGER,
                size BIGINT,
                tracker TEXT,
                sources TEXT,
                parsed TEXT,
                timestamp INTEGER
            );

            -- One row per logical key, scoped by which of season/episode are
            -- present. The four partial indexes keep the scopes from
            -- colliding with each other.
            CREATE UNIQUE INDEX IF NOT EXISTS torrents_series_both_idx
            ON torrents (media_id, info_hash, season, episode)
            WHERE season IS NOT NULL AND episode IS NOT NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS torrents_season_only_idx
            ON torrents (media_id, info_hash, season)
            WHERE season IS NOT NULL AND episode IS NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS torrents_episode_only_idx
            ON torrents (media_id, info_hash, episode)
            WHERE season IS NULL AND episode IS NOT NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS torrents_no_season_episode_idx
            ON torrents (media_id, info_hash)
            WHERE season IS NULL AND episode IS NULL;

            CREATE TABLE IF NOT EXISTS debrid_availability (
                debrid_service TEXT,
                info_hash TEXT,
                file_index TEXT,
                title TEXT,
                season INTEGER,
                episode INTEGER,
                size BIGINT,
                parsed TEXT,
                timestamp INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS debrid_series_both_idx
            ON debrid_availability (debrid_service, info_hash, season, episode)
            WHERE season IS NOT NULL AND episode IS NOT NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS debrid_season_only_idx
            ON debrid_availability (debrid_service, info_hash, season)
            WHERE season IS NOT NULL AND episode IS NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS debrid_episode_only_idx
            ON debrid_availability (debrid_service, info_hash, episode)
            WHERE season IS NULL AND episode IS NOT NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS debrid_no_season_episode_idx
            ON debrid_availability (debrid_service, info_hash)
            WHERE season IS NULL AND episode IS NULL;

            CREATE TABLE IF NOT EXISTS download_links_cache (
                debrid_key TEXT,
                info_hash TEXT,
                season INTEGER,
                episode INTEGER,
                download_url TEXT,
                timestamp INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS download_links_series_both_idx
            ON download_links_cache (debrid_key, info_hash, season, episode)
            WHERE season IS NOT NULL AND episode IS NOT NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS download_links_season_only_idx
            ON download_links_cache (debrid_key, info_hash, season)
            WHERE season IS NOT NULL AND episode IS NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS download_links_episode_only_idx
            ON download_links_cache (debrid_key, info_hash, episode)
            WHERE season IS NULL AND episode IS NOT NULL;

            CREATE UNIQUE INDEX IF NOT EXISTS download_links_no_season_episode_idx
            ON download_links_cache (debrid_key, info_hash)
            WHERE season IS NULL AND episode IS NULL;

            CREATE TABLE IF NOT EXISTS active_connections (
                id TEXT PRIMARY KEY,
                ip TEXT,
                content TEXT,
                timestamp INTEGER
            );
            "#,
        )?;

        Ok(())
    }

    fn purge_expired_on(conn: &Connection, config: &CacheConfig) -> Result<(), StoreError> {
        let now = now_ts();
        let sweeps = [
            ("first_searches", config.torrent_ttl_secs),
            ("metadata_cache", config.metadata_ttl_secs),
            ("torrents", config.torrent_ttl_secs),
            ("debrid_availability", config.debrid_ttl_secs),
            ("download_links_cache", config.download_link_ttl_secs),
            ("ongoing_searches", config.search_lock_ttl_secs),
        ];

        for (table, ttl) in sweeps {
            let removed = conn.execute(
                &format!("DELETE FROM {table} WHERE timestamp + ?1 < ?2"),
                params![ttl, now],
            )?;
            if removed > 0 {
                debug!(table, removed, "Purged expired cache rows");
            }
        }

        Ok(())
    }

    fn row_to_torrent(row: &rusqlite::Row) -> rusqlite::Result<CachedTorrent> {
        let sources_json: Option<String> = row.get(9)?;
        let parsed_json: Option<String> = row.get(10)?;

        Ok(CachedTorrent {
            media_id: row.get(0)?,
            info_hash: row.get(1)?,
            file_index: row.get(2)?,
            season: row.get(3)?,
            episode: row.get(4)?,
            title: row.get(5)?,
            seeders: row.get(6)?,
            size: row.get(7)?,
            tracker: row.get(8)?,
            sources: sources_json
                .and_then(|json| serde_json::from_str(&json).ok())
                .unwrap_or_default(),
            parsed: parsed_json.and_then(|json| serde_json::from_str(&json).ok()),
            timestamp: row.get(11)?,
        })
    }

    fn row_to_availability(row: &rusqlite::Row) -> rusqlite::Result<DebridAvailability> {
        let parsed_json: Option<String> = row.get(7)?;

        Ok(DebridAvailability {
            service: row.get(0)?,
            info_hash: row.get(1)?,
            file_index: row.get(2)?,
            title: row.get(3)?,
            season: row.get(4)?,
            episode: row.get(5)?,
            size: row.get(6)?,
            parsed: parsed_json.and_then(|json| serde_json::from_str(&json).ok()),
            timestamp: row.get(8)?,
        })
    }

    fn record_lookup(table: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        metrics::CACHE_LOOKUPS
            .with_label_values(&[table, result])
            .inc();
    }

    // --- torrents -----------------------------------------------------------

    /// Fresh cached torrents for a media id in the given season/episode
    /// scope. `IS` comparisons make NULL season/episode match their own
    /// scope only.
    pub fn get_torrents(
        &self,
        media_id: &str,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Result<Vec<CachedTorrent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT media_id, info_hash, file_index, season, episode, title, seeders, size,
                    tracker, sources, parsed, timestamp
             FROM torrents
             WHERE media_id = ?1 AND season IS ?2 AND episode IS ?3 AND timestamp + ?4 >= ?5",
        )?;

        let rows = stmt.query_map(
            params![media_id, season, episode, self.config.torrent_ttl_secs, now_ts()],
            Self::row_to_torrent,
        )?;

        let mut torrents = Vec::new();
        for row in rows {
            torrents.push(row?);
        }

        Self::record_lookup("torrents", !torrents.is_empty());
        Ok(torrents)
    }

    /// Insert or overwrite a torrent row within its season/episode scope.
    pub fn upsert_torrent(&self, torrent: &CachedTorrent) -> Result<(), StoreError> {
        let sources = serde_json::to_string(&torrent.sources)?;
        let parsed = torrent
            .parsed
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO torrents
             (media_id, info_hash, file_index, season, episode, title, seeders, size,
              tracker, sources, parsed, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                torrent.media_id,
                torrent.info_hash,
                torrent.file_index,
                torrent.season,
                torrent.episode,
                torrent.title,
                torrent.seeders,
                torrent.size,
                torrent.tracker,
                sources,
                parsed,
                torrent.timestamp,
            ],
        )?;

        Ok(())
    }

    // --- debrid availability ------------------------------------------------

    /// Fresh availability records for any of `hashes` on a service, within
    /// the given season/episode scope.
    pub fn get_availability(
        &self,
        service: &str,
        hashes: &[String],
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Result<Vec<DebridAvailability>, StoreError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; hashes.len()].join(", ");
        let sql = format!(
            "SELECT debrid_service, info_hash, file_index, title, season, episode, size,
                    parsed, timestamp
             FROM debrid_availability
             WHERE debrid_service = ? AND season IS ? AND episode IS ?
               AND timestamp + ? >= ? AND info_hash IN ({placeholders})"
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(service.to_string()),
            Box::new(season),
            Box::new(episode),
            Box::new(self.config.debrid_ttl_secs),
            Box::new(now_ts()),
        ];
        for hash in hashes {
            values.push(Box::new(hash.clone()));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::row_to_availability)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Self::record_lookup("debrid_availability", !records.is_empty());
        Ok(records)
    }

    /// Insert or overwrite an availability row within its season/episode
    /// scope.
    pub fn upsert_availability(&self, record: &DebridAvailability) -> Result<(), StoreError> {
        let parsed = record
            .parsed
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO debrid_availability
             (debrid_service, info_hash, file_index, title, season, episode, size, parsed, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.service,
                record.info_hash,
                record.file_index,
                record.title,
                record.season,
                record.episode,
                record.size,
                parsed,
                record.timestamp,
            ],
        )?;

        Ok(())
    }

    // --- download links -----------------------------------------------------

    /// Fresh unlocked link for an account/hash in the given scope.
    pub fn get_download_link(
        &self,
        debrid_key: &str,
        info_hash: &str,
        season: Option<i64>,
        episode: Option<i64>,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let url: Option<String> = conn
            .query_row(
                "SELECT download_url FROM download_links_cache
                 WHERE debrid_key = ?1 AND info_hash = ?2 AND season IS ?3 AND episode IS ?4
                   AND timestamp + ?5 >= ?6",
                params![
                    debrid_key,
                    info_hash,
                    season,
                    episode,
                    self.config.download_link_ttl_secs,
                    now_ts()
                ],
                |row| row.get(0),
            )
            .optional()?;

        Self::record_lookup("download_links", url.is_some());
        Ok(url)
    }

    /// Insert or overwrite a link row within its season/episode scope.
    pub fn upsert_download_link(&self, link: &CachedDownloadLink) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO download_links_cache
             (debrid_key, info_hash, season, episode, download_url, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.debrid_key,
                link.info_hash,
                link.season,
                link.episode,
                link.download_url,
                link.timestamp,
            ],
        )?;

        Ok(())
    }

    // --- metadata -----------------------------------------------------------

    /// Fresh upstream metadata for a media id.
    pub fn get_metadata(&self, media_id: &str) -> Result<Option<CachedMetadata>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let metadata = conn
            .query_row(
                "SELECT media_id, title, year, year_end, aliases, timestamp
                 FROM metadata_cache
                 WHERE media_id = ?1 AND timestamp + ?2 >= ?3",
                params![media_id, self.config.metadata_ttl_secs, now_ts()],
                |row| {
                    let aliases_json: Option<String> = row.get(4)?;
                    Ok(CachedMetadata {
                        media_id: row.get(0)?,
                        title: row.get(1)?,
                        year: row.get(2)?,
                        year_end: row.get(3)?,
                        aliases: aliases_json
                            .and_then(|json| serde_json::from_str(&json).ok())
                            .unwrap_or_default(),
                        timestamp: row.get(5)?,
                    })
                },
            )
            .optional()?;

        Self::record_lookup("metadata", metadata.is_some());
        Ok(metadata)
    }

    /// Insert or overwrite the metadata row for a media id.
    pub fn upsert_metadata(&self, metadata: &CachedMetadata) -> Result<(), StoreError> {
        let aliases = serde_json::to_string(&metadata.aliases)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO metadata_cache
             (media_id, title, year, year_end, aliases, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                metadata.media_id,
                metadata.title,
                metadata.year,
                metadata.year_end,
                aliases,
                metadata.timestamp,
            ],
        )?;

        Ok(())
    }

    // --- search coordination ------------------------------------------------

    /// Claim the search lock for a media id.
    ///
    /// Returns `true` on success; `false` means another process (or task)
    /// holds it. Markers older than the search-lock TTL are reclaimed first,
    /// so a crashed holder cannot wedge the key between startup sweeps.
    pub fn try_acquire_search(&self, media_id: &str) -> Result<bool, StoreError> {
        let now = now_ts();
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "DELETE FROM ongoing_searches WHERE media_id = ?1 AND timestamp + ?2 < ?3",
            params![media_id, self.config.search_lock_ttl_secs, now],
        )?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO ongoing_searches (media_id, timestamp) VALUES (?1, ?2)",
            params![media_id, now],
        )?;

        let acquired = inserted > 0;
        let result = if acquired { "acquired" } else { "busy" };
        metrics::SEARCH_LOCKS.with_label_values(&[result]).inc();
        Ok(acquired)
    }

    /// Release the search lock for a media id.
    pub fn release_search(&self, media_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM ongoing_searches WHERE media_id = ?1",
            params![media_id],
        )?;
        Ok(())
    }

    /// Claim the search lock and get a guard that releases it on drop, so
    /// the marker comes off on every exit path of a search.
    pub fn acquire_search(&self, media_id: &str) -> Result<Option<SearchGuard<'_>>, StoreError> {
        if self.try_acquire_search(media_id)? {
            Ok(Some(SearchGuard {
                store: self,
                media_id: media_id.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    // --- first searches -----------------------------------------------------

    /// Whether no fresh search for this media id has been recorded yet.
    pub fn is_first_search(&self, media_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let seen: Option<i64> = conn
            .query_row(
                "SELECT timestamp FROM first_searches
                 WHERE media_id = ?1 AND timestamp + ?2 >= ?3",
                params![media_id, self.config.torrent_ttl_secs, now_ts()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen.is_none())
    }

    /// Record that a search for this media id happened.
    pub fn record_first_search(&self, media_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO first_searches (media_id, timestamp) VALUES (?1, ?2)",
            params![media_id, now_ts()],
        )?;
        Ok(())
    }

    // --- active connections -------------------------------------------------

    /// Register (or refresh) a streaming session.
    pub fn register_connection(&self, connection: &ActiveConnection) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO active_connections (id, ip, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                connection.id,
                connection.ip,
                connection.content,
                connection.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Drop a streaming session.
    pub fn remove_connection(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM active_connections WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// All currently registered streaming sessions.
    pub fn active_connections(&self) -> Result<Vec<ActiveConnection>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, ip, content, timestamp FROM active_connections")?;
        let rows = stmt.query_map([], |row| {
            Ok(ActiveConnection {
                id: row.get(0)?,
                ip: row.get(1)?,
                content: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;

        let mut connections = Vec::new();
        for row in rows {
            connections.push(row?);
        }
        Ok(connections)
    }

    // --- maintenance --------------------------------------------------------

    /// Remove every row past its table's TTL. Runs at startup; also safe to
    /// run on a schedule.
    pub fn purge_expired(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::purge_expired_on(&conn, &self.config)
    }

    /// Row counts per table.
    pub fn stats(&self) -> Result<CacheStats, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: u64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(n)
        };

        Ok(CacheStats {
            torrents: count("torrents")?,
            availability: count("debrid_availability")?,
            download_links: count("download_links_cache")?,
            metadata: count("metadata_cache")?,
            ongoing_searches: count("ongoing_searches")?,
            active_connections: count("active_connections")?,
        })
    }
}

/// RAII handle on an ongoing-search marker; releases it on drop.
pub struct SearchGuard<'a> {
    store: &'a SqliteStore,
    media_id: String,
}

impl SearchGuard<'_> {
    pub fn media_id(&self) -> &str {
        &self.media_id
    }
}

impl Drop for SearchGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_search(&self.media_id) {
            warn!(media_id = %self.media_id, error = %e, "Failed to release search lock");
        }
    }
}
