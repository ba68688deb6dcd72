//! Persisted sync state.
//!
//! One JSON document, `.planning/notion-sync.json`, records for every project
//! which remote page each local file and folder maps to, the fingerprint each
//! file had when it was last written, and every image uploaded so far keyed by
//! content hash. The orchestrator saves it after every successful unit of work.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{Error, ErrorContext, ErrorDetail, block::Block};

pub const STATE_VERSION: u32 = 1;
pub const PLANNING_DIR: &str = ".planning";
pub const STATE_FILE: &str = "notion-sync.json";
pub const CONVERSIONS_FILE: &str = "notion-conversions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub version: u32,
    #[serde(default)]
    pub workspace_page_id: Option<String>,
    #[serde(default)]
    pub projects: IndexMap<String, ProjectState>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            workspace_page_id: None,
            projects: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub root_page_id: Option<String>,
    /// Folder key to grouping page.
    #[serde(default)]
    pub phase_pages: IndexMap<String, String>,
    /// Relative document path to page record.
    #[serde(default)]
    pub doc_pages: IndexMap<String, DocPage>,
    /// SHA-256 of image bytes to upload record.
    #[serde(default)]
    pub image_uploads: IndexMap<String, ImageUploadRecord>,
}

/// A document's page mapping. Older state files store a bare page id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocPage {
    Record(DocPageRecord),
    Legacy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocPageRecord {
    pub page_id: String,
    #[serde(default, alias = "hash")]
    pub content_hash: Option<String>,
    #[serde(default, alias = "syncedAt")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl DocPage {
    pub fn page_id(&self) -> &str {
        match self {
            DocPage::Record(record) => &record.page_id,
            DocPage::Legacy(page_id) => page_id,
        }
    }

    pub fn content_hash(&self) -> Option<&str> {
        match self {
            DocPage::Record(record) => record.content_hash.as_deref(),
            DocPage::Legacy(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUploadRecord {
    #[serde(alias = "file_upload_id")]
    pub upload_id: String,
    pub local_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl SyncState {
    pub fn project(&self, slug: &str) -> Option<&ProjectState> {
        self.projects.get(slug)
    }

    pub fn project_mut(&mut self, slug: &str) -> &mut ProjectState {
        self.projects.entry(slug.to_owned()).or_default()
    }

    pub fn doc_page(&self, slug: &str, key: &str) -> Option<&DocPage> {
        self.project(slug)?.doc_pages.get(key)
    }

    pub fn set_doc_page(&mut self, slug: &str, key: &str, page_id: &str, content_hash: &str) {
        self.project_mut(slug).doc_pages.insert(
            key.to_owned(),
            DocPage::Record(DocPageRecord {
                page_id: page_id.to_owned(),
                content_hash: Some(content_hash.to_owned()),
                synced_at: Some(Utc::now()),
            }),
        );
    }

    pub fn remove_doc_page(&mut self, slug: &str, key: &str) -> Option<DocPage> {
        self.projects.get_mut(slug)?.doc_pages.shift_remove(key)
    }

    pub fn image_upload(&self, slug: &str, hash: &str) -> Option<&ImageUploadRecord> {
        self.project(slug)?.image_uploads.get(hash)
    }
}

/// Location of the state document. A read-only store never writes, which is
/// how dry runs keep their simulated changes in memory.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    read_only: bool,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
        }
    }

    pub fn for_cwd(cwd: &Path) -> Self {
        Self::new(cwd.join(PLANNING_DIR).join(STATE_FILE))
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, creating an empty document when none exists yet.
    pub async fn load(&self) -> Result<SyncState, Error> {
        let context = ErrorContext::new(&self.path);
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no sync state yet, starting empty");
                let state = SyncState::default();
                self.save(&state).await?;
                return Ok(state);
            }
            Err(e) => return Err(context.error(ErrorDetail::ReadState(e))),
        };
        let state: SyncState = serde_json::from_str(&content)
            .inspect_err(|error| error!(%error, path = %self.path.display(), "malformed sync state"))
            .map_err(|e| context.error(ErrorDetail::ParseState(e)))?;
        if state.version > STATE_VERSION {
            return Err(context.error(ErrorDetail::UnsupportedStateVersion(state.version)));
        }
        Ok(state)
    }

    /// Write the whole document through a temporary file and a rename.
    pub async fn save(&self, state: &SyncState) -> Result<(), Error> {
        if self.read_only {
            return Ok(());
        }
        write_json(&self.path, state).await
    }
}

async fn write_json(path: &Path, value: &impl Serialize) -> Result<(), Error> {
    let context = ErrorContext::new(path);
    let content =
        serde_json::to_string_pretty(value).map_err(|e| context.error(ErrorDetail::EncodeState(e)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| context.error(ErrorDetail::WriteState(e)))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| context.error(ErrorDetail::WriteState(e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| context.error(ErrorDetail::WriteState(e)))
}

/// Per-document conversion statistics, kept for inspection only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub file: String,
    pub converted_at: DateTime<Utc>,
    pub block_count: usize,
    pub chunks: usize,
}

impl ConversionStats {
    pub fn new(file: impl Into<String>, chunks: &[Vec<Block>]) -> Self {
        Self {
            file: file.into(),
            converted_at: Utc::now(),
            block_count: chunks.iter().map(Vec::len).sum(),
            chunks: chunks.len(),
        }
    }
}

/// The conversion statistics document, keyed by BLAKE3 of the source.
#[derive(Debug, Clone)]
pub struct ConversionLog {
    path: PathBuf,
}

impl ConversionLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    pub fn for_cwd(cwd: &Path) -> Self {
        Self::new(&cwd.join(PLANNING_DIR).join(CONVERSIONS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<IndexMap<String, ConversionStats>, Error> {
        let context = ErrorContext::new(&self.path);
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| context.error(ErrorDetail::ParseState(e)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexMap::new()),
            Err(e) => Err(context.error(ErrorDetail::ReadState(e))),
        }
    }

    pub async fn record(&self, content_hash: &str, stats: ConversionStats) -> Result<(), Error> {
        let mut entries = self.load().await?;
        entries.insert(content_hash.to_owned(), stats);
        write_json(&self.path, &entries).await
    }
}
