//! Cache store lifecycle integration tests.
//!
//! These run against a file-backed database and exercise what happens across
//! process restarts: which rows survive a reopen, which get swept, and how a
//! schema version bump rebuilds the tables.

use std::path::PathBuf;

use tempfile::TempDir;

use unfetter_core::store::now_ts;
use unfetter_core::{
    ActiveConnection, CacheConfig, CachedDownloadLink, CachedMetadata, CachedTorrent, SqliteStore,
};

struct TestDb {
    config: CacheConfig,
    _temp_dir: TempDir,
}

impl TestDb {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = CacheConfig {
            path: temp_dir.path().join("cache.db"),
            ..CacheConfig::default()
        };
        Self {
            config,
            _temp_dir: temp_dir,
        }
    }

    fn open(&self) -> SqliteStore {
        SqliteStore::open(self.config.clone()).expect("Failed to open store")
    }

    fn path(&self) -> PathBuf {
        self.config.path.clone()
    }
}

fn sample_torrent() -> CachedTorrent {
    let mut torrent = CachedTorrent::new("tt0903747", "abc123");
    torrent.season = Some(1);
    torrent.episode = Some(2);
    torrent.title = Some("Show.S01E02.mkv".to_string());
    torrent.file_index = Some(3);
    torrent
}

#[test]
fn test_durable_rows_survive_reopen() {
    let db = TestDb::new();

    {
        let store = db.open();
        store.upsert_torrent(&sample_torrent()).unwrap();
        store
            .upsert_metadata(&CachedMetadata::new("tt0903747", "Breaking Bad"))
            .unwrap();
    }

    let store = db.open();
    let torrents = store.get_torrents("tt0903747", Some(1), Some(2)).unwrap();
    assert_eq!(torrents.len(), 1);
    assert_eq!(torrents[0].title.as_deref(), Some("Show.S01E02.mkv"));

    let metadata = store.get_metadata("tt0903747").unwrap().unwrap();
    assert_eq!(metadata.title, "Breaking Bad");
}

#[test]
fn test_startup_clears_volatile_tables() {
    let db = TestDb::new();

    {
        let store = db.open();
        assert!(store.try_acquire_search("tt0903747").unwrap());
        store
            .upsert_download_link(&CachedDownloadLink::new(
                "key1",
                "abc123",
                "https://dl.example/f/1",
            ))
            .unwrap();
        store
            .register_connection(&ActiveConnection::new("c1", "10.0.0.1", "tt0903747"))
            .unwrap();
        // Simulate a crash: the lock is never released.
    }

    let store = db.open();
    // A crashed holder's lock must not survive a restart.
    assert!(store.try_acquire_search("tt0903747").unwrap());
    assert!(store
        .get_download_link("key1", "abc123", None, None)
        .unwrap()
        .is_none());
    assert!(store.active_connections().unwrap().is_empty());
}

#[test]
fn test_startup_purges_expired_rows() {
    let db = TestDb::new();

    {
        let store = db.open();
        let mut stale = sample_torrent();
        stale.timestamp = now_ts() - db.config.torrent_ttl_secs - 10;
        store.upsert_torrent(&stale).unwrap();

        let mut fresh = sample_torrent();
        fresh.info_hash = "def456".to_string();
        store.upsert_torrent(&fresh).unwrap();

        assert_eq!(store.stats().unwrap().torrents, 2);
    }

    let store = db.open();
    let stats = store.stats().unwrap();
    assert_eq!(stats.torrents, 1);

    let remaining = store.get_torrents("tt0903747", Some(1), Some(2)).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].info_hash, "def456");
}

#[test]
fn test_version_mismatch_rebuilds_tables() {
    let db = TestDb::new();

    {
        let store = db.open();
        store.upsert_torrent(&sample_torrent()).unwrap();
        store
            .upsert_metadata(&CachedMetadata::new("tt0903747", "Breaking Bad"))
            .unwrap();
    }

    // Tamper with the version marker, as if an older build wrote this file.
    {
        let conn = rusqlite::Connection::open(db.path()).unwrap();
        conn.execute("UPDATE db_version SET version = '0.0' WHERE id = 1", [])
            .unwrap();
    }

    let store = db.open();
    let stats = store.stats().unwrap();
    assert_eq!(stats.torrents, 0);
    assert_eq!(stats.metadata, 0);

    // The marker itself is back on the current version: reopening again
    // must not rebuild a second time.
    {
        let store2 = db.open();
        store2.upsert_torrent(&sample_torrent()).unwrap();
    }
    let store3 = db.open();
    assert_eq!(store3.stats().unwrap().torrents, 1);
}
