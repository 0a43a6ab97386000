//! Mock debrid client for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::debrid::{DebridClient, FileQuery, FileSelection};

/// Mock implementation of the `DebridClient` trait.
///
/// Configure which hashes resolve to which files, then assert on call counts
/// to verify callers hit the cache instead of the provider.
#[derive(Debug, Default)]
pub struct MockDebridClient {
    premium: Arc<RwLock<bool>>,
    /// hash -> selection handed out by `get_files`.
    files: Arc<RwLock<HashMap<String, FileSelection>>>,
    /// (hash, index) -> URL handed out by `generate_download_link`.
    links: Arc<RwLock<HashMap<(String, String), String>>>,
    get_files_calls: AtomicU32,
    link_calls: AtomicU32,
}

impl MockDebridClient {
    /// Create a new mock client with a premium account and no content.
    pub fn new() -> Self {
        Self {
            premium: Arc::new(RwLock::new(true)),
            ..Self::default()
        }
    }

    pub async fn set_premium(&self, premium: bool) {
        *self.premium.write().await = premium;
    }

    /// Make `get_files` resolve `info_hash` to the given selection.
    pub async fn set_file(&self, info_hash: &str, selection: FileSelection) {
        self.files
            .write()
            .await
            .insert(info_hash.to_string(), selection);
    }

    /// Make `generate_download_link` resolve `(info_hash, index)` to `url`.
    pub async fn set_link(&self, info_hash: &str, index: &str, url: &str) {
        self.links
            .write()
            .await
            .insert((info_hash.to_string(), index.to_string()), url.to_string());
    }

    /// How many times `get_files` was called.
    pub fn get_files_calls(&self) -> u32 {
        self.get_files_calls.load(Ordering::SeqCst)
    }

    /// How many times `generate_download_link` was called.
    pub fn link_calls(&self) -> u32 {
        self.link_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DebridClient for MockDebridClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn check_premium(&self) -> bool {
        *self.premium.read().await
    }

    async fn get_files(
        &self,
        hashes: &[String],
        _query: &FileQuery,
    ) -> HashMap<String, FileSelection> {
        self.get_files_calls.fetch_add(1, Ordering::SeqCst);

        let files = self.files.read().await;
        hashes
            .iter()
            .filter_map(|hash| files.get(hash).map(|sel| (hash.clone(), sel.clone())))
            .collect()
    }

    async fn generate_download_link(&self, info_hash: &str, file_index: &str) -> Option<String> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);

        self.links
            .read()
            .await
            .get(&(info_hash.to_string(), file_index.to_string()))
            .cloned()
    }
}
