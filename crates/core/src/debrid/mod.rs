//! Debrid provider abstraction.
//!
//! This module provides a `DebridClient` trait for resolving torrent info
//! hashes into playable files and direct download links across various
//! unlocking services (Real-Debrid, AllDebrid, Debrid-Link). Each backend
//! drives its own remote lifecycle (add, poll, select, unlock, delete) behind
//! the shared capability surface.

mod alldebrid;
mod debridlink;
mod realdebrid;
mod retry;
mod selector;
mod types;

pub use alldebrid::AllDebridClient;
pub use debridlink::DebridLinkClient;
pub use realdebrid::RealDebridClient;
pub use retry::{ProxyFailover, RetryPolicy};
pub use selector::{select_playable_file, CandidateFile, PackEntry, SelectedFile};
pub use types::*;

use std::sync::Arc;

use crate::config::{DebridConfig, DebridService};

/// Hashes are inspected in chunks of this size; chunks run concurrently,
/// hashes within a chunk sequentially, to stay under provider rate limits.
pub(crate) const HASH_CHUNK_SIZE: usize = 12;

/// Build the configured debrid backend.
pub fn create_debrid_client(config: &DebridConfig) -> Result<Arc<dyn DebridClient>, DebridError> {
    let client: Arc<dyn DebridClient> = match config.service {
        DebridService::RealDebrid => Arc::new(RealDebridClient::new(config.clone())?),
        DebridService::AllDebrid => Arc::new(AllDebridClient::new(config.clone())?),
        DebridService::DebridLink => Arc::new(DebridLinkClient::new(config.clone())?),
    };
    Ok(client)
}
