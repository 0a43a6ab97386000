//! Resolution flow integration tests.
//!
//! Drives the provider trait and the cache store together the way the search
//! pipeline does: claim the search lock, resolve hashes through the provider,
//! persist what it found, then serve repeats from the cache.

use std::collections::HashMap;
use std::sync::Arc;

use unfetter_core::testing::MockDebridClient;
use unfetter_core::{
    CachedDownloadLink, CachedTorrent, DebridAvailability, DebridClient, FileQuery, FileSelection,
    SqliteStore,
};

fn selection(index: &str, title: &str, size: u64) -> FileSelection {
    FileSelection {
        index: index.to_string(),
        title: title.to_string(),
        size,
    }
}

/// One pass of the resolution pipeline: check the availability cache, ask the
/// provider about the rest, persist what it reports.
async fn resolve_hashes(
    store: &SqliteStore,
    client: &dyn DebridClient,
    media_id: &str,
    hashes: &[String],
    query: &FileQuery,
) -> HashMap<String, FileSelection> {
    let season = query.season.map(i64::from);
    let episode = query.episode.map(i64::from);

    let cached = store
        .get_availability(client.name(), hashes, season, episode)
        .unwrap();
    let mut resolved: HashMap<String, FileSelection> = cached
        .into_iter()
        .filter_map(|record| {
            let index = record.file_index?;
            let title = record.title?;
            let size = record.size.unwrap_or(0) as u64;
            Some((record.info_hash, selection(&index, &title, size)))
        })
        .collect();

    let missing: Vec<String> = hashes
        .iter()
        .filter(|hash| !resolved.contains_key(*hash))
        .cloned()
        .collect();
    if missing.is_empty() {
        return resolved;
    }

    for (info_hash, found) in client.get_files(&missing, query).await {
        let mut availability = DebridAvailability::new(client.name(), &info_hash);
        availability.file_index = Some(found.index.clone());
        availability.title = Some(found.title.clone());
        availability.size = Some(found.size as i64);
        availability.season = season;
        availability.episode = episode;
        store.upsert_availability(&availability).unwrap();

        let mut torrent = CachedTorrent::new(media_id, &info_hash);
        torrent.season = season;
        torrent.episode = episode;
        torrent.title = Some(found.title.clone());
        torrent.size = Some(found.size as i64);
        torrent.file_index = found.index.parse().ok();
        store.upsert_torrent(&torrent).unwrap();

        resolved.insert(info_hash, found);
    }

    resolved
}

#[tokio::test]
async fn test_resolution_populates_cache_and_avoids_rework() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let client = MockDebridClient::new();
    client
        .set_file("hash_a", selection("9", "Show.S01E02.mkv", 734_003_200))
        .await;

    assert!(client.check_premium().await);

    let guard = store.acquire_search("tt0903747").unwrap().unwrap();

    let hashes = vec!["hash_a".to_string(), "hash_b".to_string()];
    let query = FileQuery::series(1, 2);
    let resolved = resolve_hashes(&store, &client, "tt0903747", &hashes, &query).await;

    // Only the hash the provider has yields a file.
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved["hash_a"].index, "9");
    assert_eq!(client.get_files_calls(), 1);

    // The resolution landed in both cache tables.
    let torrents = store.get_torrents("tt0903747", Some(1), Some(2)).unwrap();
    assert_eq!(torrents.len(), 1);
    assert_eq!(torrents[0].info_hash, "hash_a");
    assert_eq!(torrents[0].file_index, Some(9));

    drop(guard);

    // A repeat search is served from the availability cache; the provider is
    // only asked about the still-unknown hash.
    let resolved_again = resolve_hashes(&store, &client, "tt0903747", &hashes, &query).await;
    assert_eq!(resolved_again.len(), 1);
    assert_eq!(resolved_again["hash_a"].title, "Show.S01E02.mkv");
    assert_eq!(client.get_files_calls(), 2);

    let repeat_known =
        resolve_hashes(&store, &client, "tt0903747", &hashes[..1].to_vec(), &query).await;
    assert_eq!(repeat_known.len(), 1);
    // No provider call this time: everything requested was cached.
    assert_eq!(client.get_files_calls(), 2);
}

#[tokio::test]
async fn test_download_link_cached_per_account() {
    let store = SqliteStore::in_memory().unwrap();
    let client = MockDebridClient::new();
    client
        .set_link("hash_a", "9", "https://dl.example/f/abc")
        .await;

    let cached = store
        .get_download_link("account1", "hash_a", Some(1), Some(2))
        .unwrap();
    assert!(cached.is_none());

    let url = client.generate_download_link("hash_a", "9").await.unwrap();
    let mut link = CachedDownloadLink::new("account1", "hash_a", &url);
    link.season = Some(1);
    link.episode = Some(2);
    store.upsert_download_link(&link).unwrap();

    // Second request: cache hit, no provider call.
    let cached = store
        .get_download_link("account1", "hash_a", Some(1), Some(2))
        .unwrap();
    assert_eq!(cached.as_deref(), Some("https://dl.example/f/abc"));
    assert_eq!(client.link_calls(), 1);

    // A different account never sees another account's link.
    assert!(store
        .get_download_link("account2", "hash_a", Some(1), Some(2))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_search_is_blocked_until_release() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());

    let guard = store.acquire_search("tt0903747").unwrap();
    assert!(guard.is_some());

    // A second searcher (same store, as across processes) must fail fast.
    assert!(store.acquire_search("tt0903747").unwrap().is_none());
    assert!(!store.try_acquire_search("tt0903747").unwrap());

    drop(guard);
    assert!(store.acquire_search("tt0903747").unwrap().is_some());
}

#[tokio::test]
async fn test_failed_provider_yields_empty_map_not_error() {
    let store = SqliteStore::in_memory().unwrap();
    let client = MockDebridClient::new();
    client.set_premium(false).await;

    assert!(!client.check_premium().await);

    let hashes = vec!["hash_x".to_string()];
    let resolved = resolve_hashes(
        &store,
        &client,
        "tt0903747",
        &hashes,
        &FileQuery::movie(),
    )
    .await;
    assert!(resolved.is_empty());
}
