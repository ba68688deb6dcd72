//! Local image uploads.
//!
//! Images referenced from a document are validated, hashed and uploaded once
//! per distinct content. Each reference in the markdown is then swapped for a
//! marker token carrying the upload id; after parsing, [`inject_image_blocks`]
//! turns those markers into image blocks.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::Utc;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    block::{Block, ImageSource, RichSpan},
    progress::{EntryStatus, ProgressReporter},
    state::{ImageUploadRecord, StateStore, SyncState},
    store::{self, Client},
    warning::{Warning, WarningKind},
};

pub const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "bmp", "gif", "heic", "jpeg", "jpg", "png", "svg", "tif", "tiff",
];
pub const DRY_RUN_UPLOAD_ID: &str = "dry-run-upload-id";

static IMAGE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());
static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[IMAGE_UPLOAD:([^:\]]+):([^\]]*)\]\]").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read image: {0}")]
    Read(std::io::Error),
    #[error("Failed to upload image: {0}")]
    Upload(store::Error),
    #[error("Failed to record upload: {0}")]
    State(crate::Error),
}

/// The marker for one upload. Punctuation in `alt` is backslash-escaped so
/// the parser keeps the whole token in a single text run.
pub fn marker(upload_id: &str, alt: &str) -> String {
    let mut escaped = String::with_capacity(alt.len());
    for c in alt.chars() {
        if c.is_ascii_punctuation() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("[[IMAGE_UPLOAD:{upload_id}:{escaped}]]")
}

fn strip_markers(spans: &mut [RichSpan]) {
    for span in spans {
        if MARKER.is_match(&span.content) {
            span.content = MARKER.replace_all(&span.content, "$2").into_owned();
        }
    }
}

/// Replace every image reference in `uploads` with its marker token.
pub fn substitute_markers(markdown: &str, uploads: &IndexMap<String, String>) -> String {
    let mut out = markdown.to_owned();
    for (reference, upload_id) in uploads {
        let alt = IMAGE_REF
            .captures(reference)
            .and_then(|caps| caps.get(1))
            .map_or("", |alt| alt.as_str());
        out = out.replace(reference.as_str(), &marker(upload_id, alt));
    }
    out
}

/// Split paragraphs around marker tokens into image blocks. Markers anywhere
/// else, table cells included, fall back to their alt text.
pub fn inject_image_blocks(blocks: Vec<Block>) -> Vec<Block> {
    let mut out = Vec::with_capacity(blocks.len());
    for mut block in blocks {
        if let Some(children) = block.children_mut() {
            let taken = std::mem::take(children);
            *children = inject_image_blocks(taken);
        }
        match block {
            Block::Paragraph { rich_text }
                if rich_text.iter().any(|span| MARKER.is_match(&span.content)) =>
            {
                out.extend(split_paragraph(rich_text));
            }
            Block::Table {
                width,
                has_column_header,
                mut rows,
            } => {
                for cell in rows.iter_mut().flat_map(|row| row.cells.iter_mut()) {
                    strip_markers(cell);
                }
                out.push(Block::Table {
                    width,
                    has_column_header,
                    rows,
                });
            }
            mut other => {
                if let Some(spans) = other.rich_text_mut() {
                    strip_markers(spans);
                }
                out.push(other);
            }
        }
    }
    out
}

fn split_paragraph(spans: Vec<RichSpan>) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Vec<RichSpan> = Vec::new();
    for span in spans {
        let mut last = 0;
        for caps in MARKER.captures_iter(&span.content) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let before = span.content[last..whole.start()].trim_end();
            if !before.trim().is_empty() {
                current.push(span.with_content(before));
            }
            if !current.is_empty() {
                blocks.push(Block::paragraph(std::mem::take(&mut current)));
            }
            blocks.push(Block::Image(ImageSource::FileUpload {
                id: caps[1].to_owned(),
            }));
            last = whole.end();
        }
        if last == 0 {
            current.push(span);
        } else {
            let rest = span.content[last..].trim_start();
            if !rest.is_empty() {
                current.push(span.with_content(rest));
            }
        }
    }
    if !current.is_empty() {
        blocks.push(Block::paragraph(current));
    }
    blocks
}

/// A local image reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// The whole `![alt](path)` text.
    pub reference: String,
    pub alt: String,
    /// The path as written.
    pub path: String,
    /// The path resolved against the document's directory.
    pub resolved: PathBuf,
}

/// Every distinct non-http image reference in `markdown`.
pub fn extract_local_images(markdown: &str, doc_dir: &Path) -> Vec<ImageRef> {
    let mut found: IndexMap<String, ImageRef> = IndexMap::new();
    for caps in IMAGE_REF.captures_iter(markdown) {
        let target = caps[2].trim();
        let path = target
            .split_whitespace()
            .next()
            .unwrap_or(target)
            .trim_start_matches('<')
            .trim_end_matches('>');
        if path.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
            continue;
        }
        let reference = caps[0].to_owned();
        found.entry(reference.clone()).or_insert_with(|| ImageRef {
            reference,
            alt: caps[1].to_owned(),
            path: path.to_owned(),
            resolved: doc_dir.join(path),
        });
    }
    found.into_values().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NotFound,
    UnsupportedFormat,
    TooLarge,
    UploadFailed,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InvalidReason::NotFound => "not_found",
            InvalidReason::UnsupportedFormat => "unsupported_format",
            InvalidReason::TooLarge => "too_large",
            InvalidReason::UploadFailed => "upload_failed",
        })
    }
}

pub fn placeholder(path: &str, reason: InvalidReason) -> String {
    format!("[Image unavailable: {path} - {reason}]")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub size: u64,
    pub mime_type: String,
}

/// Check existence, then format, then size.
pub async fn validate_image(path: &Path) -> Result<ImageInfo, InvalidReason> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(InvalidReason::NotFound),
    };
    let supported = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));
    if !supported {
        return Err(InvalidReason::UnsupportedFormat);
    }
    if metadata.len() > MAX_IMAGE_BYTES {
        return Err(InvalidReason::TooLarge);
    }
    Ok(ImageInfo {
        size: metadata.len(),
        mime_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    Uploaded { upload_id: String },
    Cached { upload_id: String },
    Invalid { reason: InvalidReason },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageOutcome {
    pub path: String,
    #[serde(flatten)]
    pub status: ImageStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageBatch {
    /// The document with unusable references replaced by placeholders.
    pub markdown: String,
    /// Reference text to upload id, for [`substitute_markers`].
    pub uploads: IndexMap<String, String>,
    pub outcomes: Vec<ImageOutcome>,
    pub warnings: Vec<Warning>,
}

impl ImageBatch {
    fn count(&self, f: impl Fn(&ImageStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|outcome| f(&outcome.status)).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|status| matches!(status, ImageStatus::Uploaded { .. }))
    }

    pub fn cached(&self) -> usize {
        self.count(|status| matches!(status, ImageStatus::Cached { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| {
            matches!(
                status,
                ImageStatus::Invalid { .. } | ImageStatus::Failed { .. }
            )
        })
    }
}

/// Uploads the images of one project.
pub struct ImagePipeline<'a, C> {
    pub client: &'a C,
    pub store: &'a StateStore,
    pub project: &'a str,
    /// Directory `local_path` in upload records is relative to.
    pub base_dir: &'a Path,
    pub dry_run: bool,
    pub reporter: &'a dyn ProgressReporter,
}

impl<C: Client> ImagePipeline<'_, C> {
    /// Upload the images `markdown` references and rewrite what cannot be
    /// uploaded. State is saved after every new upload.
    pub async fn process(
        &self,
        entry: &str,
        markdown: &str,
        doc_path: &Path,
        state: &mut SyncState,
    ) -> Result<ImageBatch, Error> {
        let doc_dir = doc_path.parent().unwrap_or(Path::new(""));
        let images = extract_local_images(markdown, doc_dir);
        let mut batch = ImageBatch {
            markdown: markdown.to_owned(),
            ..Default::default()
        };
        let total = images.len();
        for (index, image) in images.into_iter().enumerate() {
            self.reporter.update_entry(
                entry,
                EntryStatus::ProcessingImages {
                    current: index + 1,
                    total,
                },
            );
            let status = self.process_one(&image, state).await?;
            match &status {
                ImageStatus::Uploaded { upload_id } | ImageStatus::Cached { upload_id } => {
                    batch
                        .uploads
                        .insert(image.reference.clone(), upload_id.clone());
                }
                ImageStatus::Invalid { reason } => {
                    warn!(path = %image.resolved.display(), %reason, "skipping invalid image");
                    batch.warnings.push(Warning::new(
                        WarningKind::ImageInvalid,
                        format!("{}: {reason}", image.path),
                    ));
                    batch.markdown = batch
                        .markdown
                        .replace(&image.reference, &placeholder(&image.path, *reason));
                }
                ImageStatus::Failed { error } => {
                    batch.warnings.push(Warning::new(
                        WarningKind::ImageUploadFailed,
                        format!("{}: {error}", image.path),
                    ));
                    batch.markdown = batch.markdown.replace(
                        &image.reference,
                        &placeholder(&image.path, InvalidReason::UploadFailed),
                    );
                }
            }
            batch.outcomes.push(ImageOutcome {
                path: image.path,
                status,
            });
        }
        Ok(batch)
    }

    async fn process_one(&self, image: &ImageRef, state: &mut SyncState) -> Result<ImageStatus, Error> {
        let info = match validate_image(&image.resolved).await {
            Ok(info) => info,
            Err(reason) => return Ok(ImageStatus::Invalid { reason }),
        };
        let bytes = match tokio::fs::read(&image.resolved).await {
            Ok(bytes) => bytes,
            Err(error) => {
                return Ok(ImageStatus::Failed {
                    error: Error::Read(error).to_string(),
                });
            }
        };
        let hash = sha256_hex(&bytes);
        if let Some(record) = state.image_upload(self.project, &hash) {
            debug!(path = %image.resolved.display(), upload_id = %record.upload_id, "image already uploaded");
            return Ok(ImageStatus::Cached {
                upload_id: record.upload_id.clone(),
            });
        }
        if self.dry_run {
            return Ok(ImageStatus::Uploaded {
                upload_id: DRY_RUN_UPLOAD_ID.into(),
            });
        }

        let filename = image
            .resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| image.path.clone());
        let upload_id = match self
            .client
            .create_file_upload(&filename, &info.mime_type, bytes)
            .await
        {
            Ok(upload_id) => upload_id,
            Err(error) => {
                let error = Error::Upload(error);
                warn!(%error, path = %image.resolved.display(), "image upload failed");
                return Ok(ImageStatus::Failed {
                    error: error.to_string(),
                });
            }
        };
        info!(path = %image.resolved.display(), %upload_id, "uploaded image");

        let local_path = image
            .resolved
            .strip_prefix(self.base_dir)
            .unwrap_or(&image.resolved)
            .display()
            .to_string();
        state.project_mut(self.project).image_uploads.insert(
            hash,
            ImageUploadRecord {
                upload_id: upload_id.clone(),
                local_path,
                uploaded_at: Utc::now(),
                size_bytes: info.size,
                mime_type: info.mime_type,
            },
        );
        self.store.save(state).await.map_err(Error::State)?;
        Ok(ImageStatus::Uploaded { upload_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::TableRow, deploy::memory::MemoryStore, progress::NullReporter};

    #[test]
    fn test_extract_skips_remote_and_duplicates() {
        let markdown = "\
![a](img/a.png)
![remote](https://example.com/x.png)
![a](img/a.png)
![b](../shared/b.jpg \"title\")
";
        let images = extract_local_images(markdown, Path::new("/docs/phase"));
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].alt, "a");
        assert_eq!(images[0].resolved, Path::new("/docs/phase/img/a.png"));
        assert_eq!(images[1].path, "../shared/b.jpg");
    }

    #[test]
    fn test_substitute_markers() {
        let uploads: IndexMap<_, _> = [("![d](d.png)".to_owned(), "up-1".to_owned())]
            .into_iter()
            .collect();
        let out = substitute_markers("x ![d](d.png) y ![d](d.png)", &uploads);
        assert_eq!(out, "x [[IMAGE_UPLOAD:up-1:d]] y [[IMAGE_UPLOAD:up-1:d]]");
    }

    #[test]
    fn test_marker_escapes_alt_punctuation() {
        assert_eq!(marker("up-1", "*Fig* 1"), r"[[IMAGE_UPLOAD:up-1:\*Fig\* 1]]");
        assert_eq!(marker("up-1", "plain alt"), "[[IMAGE_UPLOAD:up-1:plain alt]]");
    }

    #[test]
    fn test_inject_in_table_cells_uses_alt_text() {
        let blocks = vec![Block::Table {
            width: 2,
            has_column_header: false,
            rows: vec![TableRow {
                cells: vec![
                    vec![RichSpan::plain("[[IMAGE_UPLOAD:up-1:fig]]")],
                    vec![RichSpan::plain("x")],
                ],
            }],
        }];
        let out = inject_image_blocks(blocks);
        let Block::Table { rows, .. } = &out[0] else {
            panic!("expected table");
        };
        assert_eq!(rows[0].cells[0], vec![RichSpan::plain("fig")]);
    }

    #[test]
    fn test_inject_splits_paragraph() {
        let blocks = vec![Block::paragraph(vec![
            RichSpan::bold("See"),
            RichSpan::plain(" here [[IMAGE_UPLOAD:up-1:diagram]] and after"),
        ])];
        let out = inject_image_blocks(blocks);
        assert_eq!(
            out,
            vec![
                Block::paragraph(vec![RichSpan::bold("See"), RichSpan::plain(" here")]),
                Block::Image(ImageSource::FileUpload { id: "up-1".into() }),
                Block::paragraph(vec![RichSpan::plain("and after")]),
            ]
        );
    }

    #[test]
    fn test_inject_in_other_blocks_uses_alt_text() {
        let blocks = vec![Block::BulletedListItem {
            rich_text: vec![RichSpan::plain("item [[IMAGE_UPLOAD:up-1:chart]]")],
            children: vec![Block::paragraph(vec![RichSpan::plain(
                "[[IMAGE_UPLOAD:up-2:inner]]",
            )])],
        }];
        let out = inject_image_blocks(blocks);
        assert_eq!(out[0].plain_text(), "item chart");
        assert_eq!(
            out[0].children(),
            &[Block::Image(ImageSource::FileUpload { id: "up-2".into() })]
        );
    }

    #[tokio::test]
    async fn test_validate_order() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            validate_image(&dir.path().join("missing.txt")).await,
            Err(InvalidReason::NotFound)
        );
        tokio::fs::write(dir.path().join("notes.txt"), "x").await.unwrap();
        assert_eq!(
            validate_image(&dir.path().join("notes.txt")).await,
            Err(InvalidReason::UnsupportedFormat)
        );
        tokio::fs::write(dir.path().join("ok.PNG"), "png").await.unwrap();
        let info = validate_image(&dir.path().join("ok.PNG")).await.unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(info.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_pipeline_uploads_once_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("img")).await.unwrap();
        tokio::fs::write(root.join("img/a.png"), b"same bytes").await.unwrap();
        tokio::fs::write(root.join("img/copy.png"), b"same bytes").await.unwrap();

        let client = MemoryStore::new();
        let store = StateStore::for_cwd(root);
        let mut state = SyncState::default();
        let pipeline = ImagePipeline {
            client: &client,
            store: &store,
            project: "alpha",
            base_dir: root,
            dry_run: false,
            reporter: &NullReporter,
        };
        let markdown = "![a](img/a.png)\n\n![copy](img/copy.png)\n\n![gone](img/gone.png)\n";
        let batch = pipeline
            .process("DOC.md", markdown, &root.join("DOC.md"), &mut state)
            .await
            .unwrap();

        assert_eq!(batch.uploaded(), 1);
        assert_eq!(batch.cached(), 1);
        assert_eq!(batch.failed(), 1);
        assert_eq!(client.uploads().len(), 1);
        assert_eq!(batch.uploads.len(), 2);
        assert!(batch
            .markdown
            .contains("[Image unavailable: img/gone.png - not_found]"));
        assert_eq!(batch.warnings[0].kind, WarningKind::ImageInvalid);

        let saved = store.load().await.unwrap();
        let record = saved.project("alpha").unwrap().image_uploads.values().next().unwrap();
        assert_eq!(record.local_path, "img/a.png");
        assert_eq!(record.size_bytes, 10);
    }

    #[tokio::test]
    async fn test_pipeline_dry_run_never_uploads() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.png"), b"x").await.unwrap();
        let client = MemoryStore::new();
        let store = StateStore::for_cwd(dir.path()).read_only(true);
        let mut state = SyncState::default();
        let pipeline = ImagePipeline {
            client: &client,
            store: &store,
            project: "alpha",
            base_dir: dir.path(),
            dry_run: true,
            reporter: &NullReporter,
        };
        let batch = pipeline
            .process("D.md", "![a](a.png)", &dir.path().join("D.md"), &mut state)
            .await
            .unwrap();
        assert_eq!(batch.uploads["![a](a.png)"], DRY_RUN_UPLOAD_ID);
        assert!(client.uploads().is_empty());
        assert!(state.projects.is_empty());
    }
}
