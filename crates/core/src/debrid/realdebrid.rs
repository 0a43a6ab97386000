//! Real-Debrid provider implementation.
//!
//! Direct-unlock lifecycle: add magnet, read the torrent's file listing,
//! select a file, unrestrict the resulting link. The added torrent is always
//! deleted afterwards so inspected hashes don't pile up in the account.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::DebridConfig;
use crate::metrics;

use super::{
    build_http, chunk_hashes, magnet_uri, parse_json, retry, select_playable_file, CandidateFile,
    DebridClient, DebridError, FileQuery, FileSelection, ProxyFailover, RetryPolicy,
    HASH_CHUNK_SIZE,
};

const API_URL: &str = "https://api.real-debrid.com/rest/1.0";
const VPN_CHECK_URL: &str = "https://real-debrid.com/vpn";
const BLOCKED_MARKER: &str =
    "Your ISP or VPN provider IP address is currently blocked on our website";

/// Real-Debrid client implementation.
pub struct RealDebridClient {
    /// Swapped for a proxied client when the provider blacklists our IP.
    http: RwLock<Client>,
    config: DebridConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct RdUser {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RdAddedMagnet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RdTorrentInfo {
    #[serde(default)]
    files: Vec<RdTorrentFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RdTorrentFile {
    id: i64,
    path: String,
    bytes: u64,
}

#[derive(Debug, Deserialize)]
struct RdUnrestrictedLink {
    download: String,
}

impl RealDebridClient {
    /// Create a new Real-Debrid client.
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

    async fn add_magnet(&self, info_hash: &str) -> Result<String, DebridError> {
        let mut form = vec![("magnet", magnet_uri(info_hash))];
        if let Some(ip) = &self.config.client_ip {
            form.push(("ip", ip.clone()));
        }

        let response = self
            .http()
            .await
            .post(format!("{API_URL}/torrents/addMagnet"))
            .form(&form)
            .send()
            .await?;

        let added: RdAddedMagnet = parse_json(response).await?;
        Ok(added.id)
    }

    async fn torrent_info(&self, torrent_id: &str) -> Result<RdTorrentInfo, DebridError> {
        let response = self
            .http()
            .await
            .get(format!("{API_URL}/torrents/info/{torrent_id}"))
            .send()
            .await?;

        parse_json(response).await
    }

    async fn select_files(&self, torrent_id: &str, file_index: &str) -> Result<(), DebridError> {
        let mut form = vec![("files", file_index.to_string())];
        if let Some(ip) = &self.config.client_ip {
            form.push(("ip", ip.clone()));
        }

        let response = self
            .http()
            .await
            .post(format!("{API_URL}/torrents/selectFiles/{torrent_id}"))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DebridError::Upstream {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn unrestrict(&self, link: &str) -> Result<String, DebridError> {
        let mut form = vec![("link", link.to_string())];
        if let Some(ip) = &self.config.client_ip {
            form.push(("ip", ip.clone()));
        }

        let response = self
            .http()
            .await
            .post(format!("{API_URL}/unrestrict/link"))
            .form(&form)
            .send()
            .await?;

        let unrestricted: RdUnrestrictedLink = parse_json(response).await?;
        Ok(unrestricted.download)
    }

    /// Delete the remote torrent. Best-effort and idempotent: a missing
    /// torrent counts as already cleaned up.
    async fn delete_torrent(&self, torrent_id: &str) {
        let result: Result<(), DebridError> = async {
            let response = self
                .http()
                .await
                .delete(format!("{API_URL}/torrents/delete/{torrent_id}"))
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
            debug!(torrent_id, error = %e, "Failed to delete remote torrent");
        }
    }

    /// Probe the public status page for the blocked-IP marker and reroute
    /// through the configured proxy if it shows up. Without a proxy the call
    /// chain continues unproxied (degraded).
    async fn check_blacklist(&self) {
        let body = match self.http().await.get(VPN_CHECK_URL).send().await {
            Ok(response) => response.text().await.unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "Blacklist probe failed, continuing without it");
                return;
            }
        };

        if is_blocked_page(&body) {
            self.activate_proxy().await;
        }
    }

    /// Resolve one hash to its matching file, cleaning up the remote torrent
    /// on every path.
    async fn inspect_hash(&self, info_hash: &str, query: &FileQuery) -> Option<FileSelection> {
        let torrent_id = retry::run(
            &self.retry,
            "realdebrid",
            "add_magnet",
            info_hash,
            Some(self as &dyn ProxyFailover),
            || self.add_magnet(info_hash),
        )
        .await
        .ok()?;

        let outcome = self.pick_file(&torrent_id, query).await;
        self.delete_torrent(&torrent_id).await;

        match outcome {
            Ok(selection) => selection,
            Err(e) => {
                warn!(info_hash, error = %e, "Failed to inspect torrent on Real-Debrid");
                None
            }
        }
    }

    async fn pick_file(
        &self,
        torrent_id: &str,
        query: &FileQuery,
    ) -> Result<Option<FileSelection>, DebridError> {
        let info = retry::run(
            &self.retry,
            "realdebrid",
            "torrent_info",
            torrent_id,
            Some(self as &dyn ProxyFailover),
            || self.torrent_info(torrent_id),
        )
        .await?;

        let candidates: Vec<CandidateFile> = info
            .files
            .iter()
            .map(|f| CandidateFile::new(f.path.trim_start_matches('/'), f.bytes))
            .collect();

        Ok(select_playable_file(&candidates, query).map(|selected| FileSelection {
            index: info.files[selected.index].id.to_string(),
            title: selected.title,
            size: selected.size,
        }))
    }

    async fn unlock(&self, info_hash: &str, file_index: &str) -> Result<String, DebridError> {
        self.check_blacklist().await;

        let torrent_id = retry::run(
            &self.retry,
            "realdebrid",
            "add_magnet",
            info_hash,
            Some(self as &dyn ProxyFailover),
            || self.add_magnet(info_hash),
        )
        .await?;

        let result = self.unlock_added(&torrent_id, file_index).await;
        self.delete_torrent(&torrent_id).await;
        result
    }

    async fn unlock_added(&self, torrent_id: &str, file_index: &str) -> Result<String, DebridError> {
        retry::run(
            &self.retry,
            "realdebrid",
            "select_files",
            torrent_id,
            Some(self as &dyn ProxyFailover),
            || self.select_files(torrent_id, file_index),
        )
        .await?;

        let info = retry::run(
            &self.retry,
            "realdebrid",
            "torrent_info",
            torrent_id,
            Some(self as &dyn ProxyFailover),
            || self.torrent_info(torrent_id),
        )
        .await?;

        let link = info.links.first().cloned().ok_or_else(|| {
            DebridError::MalformedResponse("torrent has no links after file selection".to_string())
        })?;

        retry::run(
            &self.retry,
            "realdebrid",
            "unrestrict",
            torrent_id,
            Some(self as &dyn ProxyFailover),
            || self.unrestrict(&link),
        )
        .await
    }
}

/// Whether the Real-Debrid status page reports our IP as blacklisted.
fn is_blocked_page(body: &str) -> bool {
    body.contains(BLOCKED_MARKER)
}

#[async_trait]
impl ProxyFailover for RealDebridClient {
    async fn activate_proxy(&self) -> bool {
        let Some(proxy) = self.config.proxy_url.as_deref() else {
            warn!("Real-Debrid blacklisted the server's IP and no proxy is configured");
            return false;
        };

        match build_http(&self.config, Some(proxy)) {
            Ok(client) => {
                *self.http.write().await = client;
                warn!(proxy, "Real-Debrid traffic switched to proxy");
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
impl DebridClient for RealDebridClient {
    fn name(&self) -> &str {
        "realdebrid"
    }

    async fn check_premium(&self) -> bool {
        let result: Result<RdUser, DebridError> = async {
            let response = self.http().await.get(format!("{API_URL}/user")).send().await?;
            parse_json(response).await
        }
        .await;

        match result {
            Ok(user) => user.kind == "premium",
            Err(e) => {
                warn!(error = %e, "Failed to check premium status on Real-Debrid");
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
                    .with_label_values(&["realdebrid", "success"])
                    .inc();
                Some(url)
            }
            Err(e) => {
                warn!(info_hash, file_index, error = %e,
                      "Failed to generate download link on Real-Debrid");
                metrics::LINKS_GENERATED
                    .with_label_values(&["realdebrid", "failed"])
                    .inc();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::MediaKind;

    #[test]
    fn test_parse_added_magnet() {
        let json = r#"{"id": "JKLMNO", "uri": "https://api.real-debrid.com/rest/1.0/torrents/info/JKLMNO"}"#;
        let added: RdAddedMagnet = serde_json::from_str(json).unwrap();
        assert_eq!(added.id, "JKLMNO");
    }

    #[test]
    fn test_parse_torrent_info() {
        let json = r#"{
            "id": "JKLMNO",
            "status": "waiting_files_selection",
            "files": [
                {"id": 1, "path": "/Show.S01E02.mkv", "bytes": 734003200, "selected": 0},
                {"id": 2, "path": "/Show.S01E02.sample.mkv", "bytes": 10485760, "selected": 0}
            ],
            "links": []
        }"#;
        let info: RdTorrentInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.files.len(), 2);
        assert_eq!(info.files[0].id, 1);
        assert_eq!(info.files[0].path, "/Show.S01E02.mkv");
        assert!(info.links.is_empty());
    }

    #[test]
    fn test_parse_torrent_info_without_files() {
        let info: RdTorrentInfo = serde_json::from_str(r#"{"id": "X", "status": "magnet_conversion"}"#).unwrap();
        assert!(info.files.is_empty());
    }

    #[test]
    fn test_selection_uses_file_id_not_position() {
        // The file listing is filtered positionally but Real-Debrid expects
        // its own file id back in selectFiles.
        let info: RdTorrentInfo = serde_json::from_str(
            r#"{"files": [
                {"id": 7, "path": "/sample/Show.S01E02.sample.mkv", "bytes": 1000},
                {"id": 9, "path": "/Show.S01E02.mkv", "bytes": 734003200}
            ]}"#,
        )
        .unwrap();

        let candidates: Vec<CandidateFile> = info
            .files
            .iter()
            .map(|f| CandidateFile::new(f.path.trim_start_matches('/'), f.bytes))
            .collect();

        let query = FileQuery {
            kind: MediaKind::Series,
            season: Some(1),
            episode: Some(2),
            kitsu: false,
        };
        let selected = select_playable_file(&candidates, &query).unwrap();
        assert_eq!(info.files[selected.index].id, 9);
    }

    #[test]
    fn test_parse_unrestricted_link() {
        let json = r#"{"id": "ABC", "filename": "Show.S01E02.mkv", "download": "https://real-debrid.com/d/ABC"}"#;
        let link: RdUnrestrictedLink = serde_json::from_str(json).unwrap();
        assert_eq!(link.download, "https://real-debrid.com/d/ABC");
    }

    #[test]
    fn test_parse_user() {
        let premium: RdUser = serde_json::from_str(r#"{"id": 1, "type": "premium"}"#).unwrap();
        assert_eq!(premium.kind, "premium");

        let free: RdUser = serde_json::from_str(r#"{"id": 2, "type": "free"}"#).unwrap();
        assert_eq!(free.kind, "free");
    }

    #[test]
    fn test_blocked_page_detection() {
        let blocked = format!("<html><body>{BLOCKED_MARKER}</body></html>");
        assert!(is_blocked_page(&blocked));
        assert!(!is_blocked_page("<html><body>VPN information</body></html>"));
    }
}
