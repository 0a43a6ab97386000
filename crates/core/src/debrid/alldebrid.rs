//! AllDebrid provider implementation.
//!
//! Direct-unlock lifecycle: upload magnet, read the magnet status (which
//! carries the file listing), unlock the chosen link. Responses come wrapped
//! in a status/data/error envelope; the `NO_SERVER` error code is the
//! provider's way of saying our egress IP is blacklisted.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::DebridConfig;
use crate::metrics;

use super::{
    build_http, chunk_hashes, parse_json, retry, select_playable_file, CandidateFile,
    DebridClient, DebridError, FileQuery, FileSelection, PackEntry, ProxyFailover, RetryPolicy,
    HASH_CHUNK_SIZE,
};

const API_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "unfetter";

const BLOCKED_CODE: &str = "NO_SERVER";
const INVALID_MAGNET_CODE: &str = "MAGNET_INVALID_ID";

/// AllDebrid client implementation.
pub struct AllDebridClient {
    http: RwLock<Client>,
    config: DebridConfig,
    retry: RetryPolicy,
}

/// Envelope every AllDebrid endpoint answers with.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct AdEnvelope<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<AdError>,
}

#[derive(Debug, Deserialize)]
struct AdError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AdUserData {
    user: AdUser,
}

#[derive(Debug, Deserialize)]
struct AdUser {
    #[serde(rename = "isPremium", default)]
    is_premium: bool,
}

#[derive(Debug, Deserialize)]
struct AdUploadData {
    magnets: Vec<AdUploadedMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdUploadedMagnet {
    id: i64,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct AdStatusData {
    magnets: AdMagnetStatus,
}

#[derive(Debug, Deserialize)]
struct AdMagnetStatus {
    #[serde(default)]
    links: Vec<AdLink>,
}

#[derive(Debug, Deserialize)]
struct AdLink {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    link: String,
    /// Pack entries: logical files inside an archive link.
    #[serde(rename = "e", default)]
    entries: Vec<AdPackEntry>,
}

#[derive(Debug, Deserialize)]
struct AdPackEntry {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: u64,
}

/// Unwrap the AllDebrid envelope into data or a classified error.
fn unwrap_envelope<T>(envelope: AdEnvelope<T>) -> Result<T, DebridError> {
    if envelope.status == "success" {
        return envelope.data.ok_or_else(|| {
            DebridError::MalformedResponse("success response without data".to_string())
        });
    }

    match envelope.error {
        Some(error) if error.code == BLOCKED_CODE => Err(DebridError::BlockedEgress),
        Some(error) if error.code == INVALID_MAGNET_CODE => {
            Err(DebridError::InvalidReference(error.code))
        }
        Some(error) => Err(DebridError::MalformedResponse(format!(
            "unexpected error code {}: {}",
            error.code, error.message
        ))),
        None => Err(DebridError::MalformedResponse(
            "error response without error object".to_string(),
        )),
    }
}

impl AllDebridClient {
    /// Create a new AllDebrid client.
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

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, DebridError> {
        let response = self.http().await.get(url).send().await?;
        let envelope: AdEnvelope<T> = parse_json(response).await?;
        unwrap_envelope(envelope)
    }

    async fn upload_magnet(&self, info_hash: &str) -> Result<i64, DebridError> {
        let data: AdUploadData = self
            .get(format!(
                "{API_URL}/magnet/upload?agent={AGENT}&magnets[]={info_hash}"
            ))
            .await?;

        data.magnets
            .first()
            .map(|m| m.id)
            .ok_or_else(|| DebridError::MalformedResponse("upload returned no magnets".to_string()))
    }

    async fn magnet_status(&self, magnet_id: i64) -> Result<AdMagnetStatus, DebridError> {
        let data: AdStatusData = self
            .get(format!(
                "{API_URL}/magnet/status?agent={AGENT}&id={magnet_id}"
            ))
            .await?;
        Ok(data.magnets)
    }

    async fn unlock_link(&self, link: &str) -> Result<String, DebridError> {
        #[derive(Debug, Deserialize)]
        struct AdUnlockData {
            link: String,
        }

        let encoded = urlencoding::encode(link);
        let data: AdUnlockData = self
            .get(format!("{API_URL}/link/unlock?agent={AGENT}&link={encoded}"))
            .await?;
        Ok(data.link)
    }

    /// Delete the remote magnet. Best-effort and idempotent: an invalid id
    /// counts as already cleaned up.
    async fn delete_magnet(&self, magnet_id: i64) {
        let result: Result<serde_json::Value, DebridError> = self
            .get(format!(
                "{API_URL}/magnet/delete?agent={AGENT}&id={magnet_id}"
            ))
            .await;

        match result {
            Ok(_) | Err(DebridError::InvalidReference(_)) => {}
            Err(e) => debug!(magnet_id, error = %e, "Failed to delete remote magnet"),
        }
    }

    /// Resolve one hash to its matching file, cleaning up the remote magnet
    /// on every path.
    async fn inspect_hash(&self, info_hash: &str, query: &FileQuery) -> Option<FileSelection> {
        let magnet_id = retry::run(
            &self.retry,
            "alldebrid",
            "upload_magnet",
            info_hash,
            Some(self as &dyn ProxyFailover),
            || self.upload_magnet(info_hash),
        )
        .await
        .ok()?;

        let outcome = self.pick_file(magnet_id, query).await;
        self.delete_magnet(magnet_id).await;

        match outcome {
            Ok(selection) => selection,
            Err(e) => {
                warn!(info_hash, error = %e, "Failed to inspect magnet on AllDebrid");
                None
            }
        }
    }

    async fn pick_file(
        &self,
        magnet_id: i64,
        query: &FileQuery,
    ) -> Result<Option<FileSelection>, DebridError> {
        let status = retry::run(
            &self.retry,
            "alldebrid",
            "magnet_status",
            &magnet_id.to_string(),
            Some(self as &dyn ProxyFailover),
            || self.magnet_status(magnet_id),
        )
        .await?;

        let candidates: Vec<CandidateFile> = status
            .links
            .iter()
            .map(|link| {
                CandidateFile::new(link.filename.clone(), link.size).with_pack(
                    link.entries
                        .iter()
                        .map(|entry| PackEntry {
                            name: entry.filename.clone(),
                            size: entry.size,
                        })
                        .collect(),
                )
            })
            .collect();

        Ok(
            select_playable_file(&candidates, query).map(|selected| FileSelection {
                index: selected.index.to_string(),
                title: selected.title,
                size: selected.size,
            }),
        )
    }

    async fn unlock(&self, info_hash: &str, file_index: &str) -> Result<String, DebridError> {
        let index: usize = file_index
            .parse()
            .map_err(|_| DebridError::InvalidReference(format!("file index {file_index}")))?;

        let magnet_id = retry::run(
            &self.retry,
            "alldebrid",
            "upload_magnet",
            info_hash,
            Some(self as &dyn ProxyFailover),
            || self.upload_magnet(info_hash),
        )
        .await?;

        let result = self.unlock_uploaded(magnet_id, index).await;
        self.delete_magnet(magnet_id).await;
        result
    }

    async fn unlock_uploaded(&self, magnet_id: i64, index: usize) -> Result<String, DebridError> {
        let status = retry::run(
            &self.retry,
            "alldebrid",
            "magnet_status",
            &magnet_id.to_string(),
            Some(self as &dyn ProxyFailover),
            || self.magnet_status(magnet_id),
        )
        .await?;

        let link = status
            .links
            .get(index)
            .map(|l| l.link.clone())
            .ok_or_else(|| {
                DebridError::MalformedResponse(format!("magnet has no link at index {index}"))
            })?;

        retry::run(
            &self.retry,
            "alldebrid",
            "unlock_link",
            &magnet_id.to_string(),
            Some(self as &dyn ProxyFailover),
            || self.unlock_link(&link),
        )
        .await
    }
}

#[async_trait]
impl ProxyFailover for AllDebridClient {
    async fn activate_proxy(&self) -> bool {
        let Some(proxy) = self.config.proxy_url.as_deref() else {
            warn!("AllDebrid blacklisted the server's IP and no proxy is configured");
            return false;
        };

        match build_http(&self.config, Some(proxy)) {
            Ok(client) => {
                *self.http.write().await = client;
                warn!(proxy, "AllDebrid traffic switched to proxy");
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
impl DebridClient for AllDebridClient {
    fn name(&self) -> &str {
        "alldebrid"
    }

    async fn check_premium(&self) -> bool {
        let result: Result<AdUserData, DebridError> =
            self.get(format!("{API_URL}/user?agent={AGENT}")).await;

        match result {
            Ok(data) => data.user.is_premium,
            Err(e) => {
                warn!(error = %e, "Failed to check premium status on AllDebrid");
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
                    .with_label_values(&["alldebrid", "success"])
                    .inc();
                Some(url)
            }
            Err(e) => {
                warn!(info_hash, file_index, error = %e,
                      "Failed to generate download link on AllDebrid");
                metrics::LINKS_GENERATED
                    .with_label_values(&["alldebrid", "failed"])
                    .inc();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_success_envelope() {
        let json = r#"{"status": "success", "data": {"magnets": [{"id": 42, "hash": "abc"}]}}"#;
        let envelope: AdEnvelope<AdUploadData> = serde_json::from_str(json).unwrap();
        let data = unwrap_envelope(envelope).unwrap();
        assert_eq!(data.magnets[0].id, 42);
        assert_eq!(data.magnets[0].hash, "abc");
    }

    #[test]
    fn test_unwrap_blocked_egress() {
        let json = r#"{"status": "error", "error": {"code": "NO_SERVER", "message": "No server allowed"}}"#;
        let envelope: AdEnvelope<AdUploadData> = serde_json::from_str(json).unwrap();
        assert!(matches!(
            unwrap_envelope(envelope),
            Err(DebridError::BlockedEgress)
        ));
    }

    #[test]
    fn test_unwrap_invalid_magnet_id() {
        let json =
            r#"{"status": "error", "error": {"code": "MAGNET_INVALID_ID", "message": "gone"}}"#;
        let envelope: AdEnvelope<AdStatusData> = serde_json::from_str(json).unwrap();
        assert!(matches!(
            unwrap_envelope(envelope),
            Err(DebridError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_unwrap_unknown_error_code() {
        let json = r#"{"status": "error", "error": {"code": "AUTH_BAD_APIKEY", "message": "bad key"}}"#;
        let envelope: AdEnvelope<AdUserData> = serde_json::from_str(json).unwrap();
        assert!(matches!(
            unwrap_envelope(envelope),
            Err(DebridError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_status_with_pack_entries() {
        let json = r#"{
            "status": "success",
            "data": {"magnets": {"id": 42, "status": "Ready", "links": [
                {"filename": "Show.Season.1.rar", "size": 9000000000, "link": "https://alldebrid.com/f/1",
                 "e": [{"filename": "Show.S01E02.mkv", "size": 734003200}]},
                {"filename": "Show.S01E03.mkv", "size": 734003200, "link": "https://alldebrid.com/f/2"}
            ]}}
        }"#;
        let envelope: AdEnvelope<AdStatusData> = serde_json::from_str(json).unwrap();
        let status = unwrap_envelope(envelope).unwrap();

        assert_eq!(status.magnets.links.len(), 2);
        assert_eq!(status.magnets.links[0].entries.len(), 1);
        assert_eq!(status.magnets.links[0].entries[0].filename, "Show.S01E02.mkv");
        assert!(status.magnets.links[1].entries.is_empty());
    }

    #[test]
    fn test_parse_user_premium() {
        let json = r#"{"status": "success", "data": {"user": {"username": "u", "isPremium": true}}}"#;
        let envelope: AdEnvelope<AdUserData> = serde_json::from_str(json).unwrap();
        assert!(unwrap_envelope(envelope).unwrap().user.is_premium);
    }
}
