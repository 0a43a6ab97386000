//! Debrid-Link provider implementation.
//!
//! Seedbox-style lifecycle: a submitted hash becomes a remote job that has to
//! be polled until it reports ready (or fails), after which its file listing
//! carries direct download URLs. Polls are spaced ~1s apart and the whole
//! wait is bounded by `seedbox_ready_timeout_secs`; both terminal outcomes
//! delete the remote job.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DebridConfig;
use crate::metrics;

use super::{
    build_http, chunk_hashes, parse_json, retry, select_playable_file, CandidateFile,
    DebridClient, DebridError, FileQuery, FileSelection, ProxyFailover, RetryPolicy,
    HASH_CHUNK_SIZE,
};

const API_URL: &str = "https://debrid-link.com/api/v2";
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Seedbox status codes that mean the job finished downloading.
const STATUS_READY: i64 = 6;
const STATUS_COMPLETE: i64 = 100;

/// Debrid-Link client implementation.
pub struct DebridLinkClient {
    http: RwLock<Client>,
    config: DebridConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct DlEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
struct DlAccount {
    #[serde(rename = "accountType", default)]
    account_type: i64,
}

#[derive(Debug, Deserialize)]
struct DlAddedTorrent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DlTorrent {
    #[serde(default)]
    status: i64,
    #[serde(rename = "downloadPercent", default)]
    download_percent: f64,
    #[serde(default)]
    files: Vec<DlFile>,
}

#[derive(Debug, Deserialize)]
struct DlFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "downloadUrl", default)]
    download_url: Option<String>,
}

/// Whether a polled job has finished downloading.
fn is_ready(torrent: &DlTorrent) -> bool {
    torrent.status == STATUS_READY
        || torrent.status == STATUS_COMPLETE
        || torrent.download_percent >= 100.0
}

impl DebridLinkClient {
    /// Create a new Debrid-Link client.
    pub fn new(config: DebridConfig) -> Result<Self, DebridError> {
        let http = build_http(&config, None)?;
        let retry = RetryPolicy::from(&config.retry);
        Ok(Self {
            http: RwLock::new(http),
            config,
            retry,
        })
    }

    async fn http(&self) -> Client {
        self.http.read().await.clone()
    }

    async fn add_torrent(&self, info_hash: &str) -> Result<String, DebridError> {
        let form = [("url", info_hash), ("async", "true")];
        let response = self
            .http()
            .await
            .post(format!("{API_URL}/seedbox/add"))
            .form(&form)
            .send()
            .await?;

        let envelope: DlEnvelope<DlAddedTorrent> = parse_json(response).await?;
        if !envelope.success {
            return Err(DebridError::MalformedResponse(
                "seedbox add was not successful".to_string(),
            ));
        }
        envelope
            .value
            .map(|added| added.id)
            .ok_or_else(|| DebridError::MalformedResponse("seedbox add returned no id".to_string()))
    }

    async fn fetch_status(&self, torrent_id: &str) -> Result<DlTorrent, DebridError> {
        let response = self
            .http()
            .await
            .get(format!("{API_URL}/seedbox/list"))
            .query(&[("ids", torrent_id)])
            .send()
            .await?;

        let envelope: DlEnvelope<Vec<DlTorrent>> = parse_json(response).await?;
        if !envelope.success {
            return Err(DebridError::InvalidReference(torrent_id.to_string()));
        }
        envelope
            .value
            .and_then(|mut torrents| {
                if torrents.is_empty() {
                    None
                } else {
                    Some(torrents.remove(0))
                }
            })
            .ok_or_else(|| DebridError::InvalidReference(torrent_id.to_string()))
    }

    /// Poll the job until it reports ready, it fails, or the configured
    /// deadline elapses.
    async fn wait_until_ready(&self, torrent_id: &str) -> Result<DlTorrent, DebridError> {
        let deadline =
            Instant::now() + Duration::from_secs(self.config.seedbox_ready_timeout_secs);

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let torrent = retry::run(
                &self.retry,
                "debridlink",
                "seedbox_status",
                torrent_id,
                Some(self as &dyn ProxyFailover),
                || self.fetch_status(torrent_id),
            )
            .await?;

            if is_ready(&torrent) {
                return Ok(torrent);
            }

            if Instant::now() >= deadline {
                warn!(torrent_id, "Seedbox job did not become ready before the deadline");
                return Err(DebridError::Timeout);
            }
        }
    }

    /// Delete the remote job. Best-effort and idempotent: a missing job
    /// counts as already cleaned up.
    async fn delete_torrent(&self, torrent_id: &str) {
        let result: Result<(), DebridError> = async {
            let response = self
                .http()
                .await
                .delete(format!("{API_URL}/seedbox/{torrent_id}/remove"))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status.as_u16() == 404 {
                Ok(())
            } else {
                Err(DebridError::Upstream {
                    status: status.as_u16(),
                })
            }
        }
        .await;

        if let Err(e) = result {
            debug!(torrent_id, error = %e, "Failed to delete remote seedbox job");
        }
    }

    /// Resolve one hash to its matching file, cleaning up the remote job on
    /// every path, ready or not.
    async fn inspect_hash(&self, info_hash: &str, query: &FileQuery) -> Option<FileSelection> {
        let torrent_id = retry::run(
            &self.retry,
            "debridlink",
            "seedbox_add",
            info_hash,
            Some(self as &dyn ProxyFailover),
            || self.add_torrent(info_hash),
        )
        .await
        .ok()?;

        let outcome = self.wait_until_ready(&torrent_id).await;
        let selection = match outcome {
            Ok(torrent) => {
                let candidates: Vec<CandidateFile> = torrent
                    .files
                    .iter()
                    .map(|f| CandidateFile::new(f.name.clone(), f.size))
                    .collect();

                select_playable_file(&candidates, query).map(|selected| FileSelection {
                    index: selected.index.to_string(),
                    title: selected.title,
                    size: selected.size,
                })
            }
            Err(e) => {
                warn!(info_hash, error = %e, "Failed to inspect seedbox job on Debrid-Link");
                None
            }
        };

        self.delete_torrent(&torrent_id).await;
        selection
    }

    async fn unlock(&self, info_hash: &str, file_index: &str) -> Result<String, DebridError> {
        let index: usize = file_index
            .parse()
            .map_err(|_| DebridError::InvalidReference(format!("file index {file_index}")))?;

        let torrent_id = retry::run(
            &self.retry,
            "debridlink",
            "seedbox_add",
            info_hash,
            Some(self as &dyn ProxyFailover),
            || self.add_torrent(info_hash),
        )
        .await?;

        let result = self.wait_until_ready(&torrent_id).await.and_then(|torrent| {
            torrent
                .files
                .get(index)
                .and_then(|file| file.download_url.clone())
                .ok_or_else(|| {
                    DebridError::MalformedResponse(format!(
                        "seedbox job has no download URL at index {index}"
                    ))
                })
        });

        self.delete_torrent(&torrent_id).await;
        result
    }
}

#[async_trait]
impl ProxyFailover for DebridLinkClient {
    async fn activate_proxy(&self) -> bool {
        let Some(proxy) = self.config.proxy_url.as_deref() else {
            warn!("Debrid-Link egress switch requested but no proxy is configured");
            return false;
        };

        match build_http(&self.config, Some(proxy)) {
            Ok(client) => {
                *self.http.write().await = client;
                warn!(proxy, "Debrid-Link traffic switched to proxy");
                true
            }
            Err(e) => {
                warn!(proxy, error = %e, "Failed to build proxied client");
                false
            }
        }
    }
}

#[async_trait]
impl DebridClient for DebridLinkClient {
    fn name(&self) -> &str {
        "debridlink"
    }

    async fn check_premium(&self) -> bool {
        let result: Result<DlEnvelope<DlAccount>, DebridError> = async {
            let response = self
                .http()
                .await
                .get(format!("{API_URL}/account/infos"))
                .send()
                .await?;
            parse_json(response).await
        }
        .await;

        match result {
            Ok(envelope) => envelope
                .value
                .map(|account| account.account_type == 1)
                .unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Failed to check premium status on Debrid-Link");
                false
            }
        }
    }

    async fn get_files(
        &self,
        hashes: &[String],
        query: &FileQuery,
    ) -> HashMap<String, FileSelection> {
        let chunks = chunk_hashes(hashes, HASH_CHUNK_SIZE);

        let tasks = chunks.into_iter().map(|chunk| async move {
            let mut found = Vec::new();
            for info_hash in chunk {
                if let Some(selection) = self.inspect_hash(&info_hash, query).await {
                    found.push((info_hash, selection));
                }
            }
            found
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    async fn generate_download_link(&self, info_hash: &str, file_index: &str) -> Option<String> {
        match self.unlock(info_hash, file_index).await {
            Ok(url) => {
                metrics::LINKS_GENERATED
                    .with_label_values(&["debridlink", "success"])
                    .inc();
                Some(url)
            }
            Err(e) => {
                warn!(info_hash, file_index, error = %e,
                      "Failed to generate download link on Debrid-Link");
                metrics::LINKS_GENERATED
                    .with_label_values(&["debridlink", "failed"])
                    .inc();
                None
            }
        }
    }
}
