//! Deciding whether a document needs to be written again.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt as _;

use crate::state::SyncState;

const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// No page recorded for this document.
    Unmapped,
    /// A page is recorded without a fingerprint.
    NoHash,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCheck {
    pub needs_sync: bool,
    pub reason: Reason,
    /// SHA-256 of the file as it is now.
    pub hash: String,
}

/// Streaming SHA-256 of a file, hex encoded.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; READ_BUFFER];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare the file at `path` against the record stored under `key`.
pub async fn needs_sync(
    path: &Path,
    key: &str,
    state: &SyncState,
    project: &str,
) -> std::io::Result<SyncCheck> {
    let hash = hash_file(path).await?;
    let reason = match state.doc_page(project, key) {
        None => Reason::Unmapped,
        Some(page) => match page.content_hash() {
            None => Reason::NoHash,
            Some(stored) if stored != hash => Reason::Changed,
            Some(_) => Reason::Unchanged,
        },
    };
    Ok(SyncCheck {
        needs_sync: reason != Reason::Unchanged,
        reason,
        hash,
    })
}
