//! Markdown to store blocks.
//!
//! [`convert`] runs the whole pipeline over one document: preprocessing,
//! image marker substitution, parsing, span splitting, nesting flattening,
//! toggle promotion, image block injection and batching. It never fails;
//! a document that cannot be parsed degrades to a single code block carrying
//! its source.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use itertools::Itertools as _;
use tracing::{debug, warn};

use crate::{
    block::{Block, MAX_SPAN_CHARS, MAX_SPANS_PER_BLOCK, RichSpan, TableRow},
    image,
    progress::{BatchPhase, EntryStatus, ProgressReporter},
    state::{ConversionLog, ConversionStats},
    warning::{self, Warning, WarningKind},
};

pub mod chunk;
pub mod flatten;
pub mod parser;
pub mod preprocess;
pub mod segment;

pub use chunk::{ChunkOptions, chunk_blocks};
pub use flatten::{MAX_DEPTH, flatten_deep_nesting, promote_toggles};
pub use preprocess::preprocess;
pub use segment::split_text;

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Original image reference (`![alt](path)`) to upload id.
    pub image_uploads: IndexMap<String, String>,
    pub chunk: ChunkOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub chunks: Vec<Vec<Block>>,
    pub warnings: Vec<Warning>,
}

pub fn convert(markdown: &str, options: &ConvertOptions) -> Conversion {
    let (result, mut warnings) = warning::collect_warnings_sync(|| convert_blocks(markdown, options));
    match result {
        Ok(chunks) => Conversion { chunks, warnings },
        Err(error) => {
            warn!(%error, "markdown conversion failed, falling back to a code block");
            warnings.push(Warning::new(
                WarningKind::ConversionError,
                format!("conversion failed: {error}"),
            ));
            Conversion {
                chunks: vec![vec![fallback_block(markdown)]],
                warnings,
            }
        }
    }
}

fn convert_blocks(markdown: &str, options: &ConvertOptions) -> Result<Vec<Vec<Block>>, parser::Error> {
    let text = preprocess(markdown);
    let with_images = !options.image_uploads.is_empty();
    let text = if with_images {
        image::substitute_markers(&text, &options.image_uploads)
    } else {
        text
    };
    let blocks = parser::parse(&text)?;
    let blocks = split_long_text(blocks);
    let blocks = flatten_deep_nesting(blocks, MAX_DEPTH);
    let blocks = promote_toggles(blocks);
    // Injection can add blocks, so it runs before batching.
    let blocks = if with_images {
        image::inject_image_blocks(blocks)
    } else {
        blocks
    };
    Ok(chunk_blocks(blocks, &options.chunk))
}

/// The raw markdown, cut to the span limit, as a markdown code block.
pub fn fallback_block(markdown: &str) -> Block {
    let head = segment::truncate(markdown, MAX_SPAN_CHARS);
    Block::Code {
        rich_text: vec![RichSpan::plain(head)],
        language: "markdown".into(),
    }
}

fn split_spans(spans: Vec<RichSpan>, verbatim: bool) -> Vec<RichSpan> {
    if verbatim {
        segment::split_rich_text_verbatim(spans, MAX_SPAN_CHARS)
    } else {
        segment::split_rich_text(spans, MAX_SPAN_CHARS)
    }
}

/// Bring every span under the length limit, then break paragraphs that ended
/// up with more spans than one block may hold.
fn split_long_text(blocks: Vec<Block>) -> Vec<Block> {
    let mut out = Vec::with_capacity(blocks.len());
    for mut block in blocks {
        let verbatim = matches!(block, Block::Code { .. });
        if let Some(spans) = block.rich_text_mut() {
            let taken = std::mem::take(spans);
            *spans = split_spans(taken, verbatim);
        }
        if let Block::Table { rows, .. } = &mut block {
            for TableRow { cells } in rows.iter_mut() {
                for cell in cells.iter_mut() {
                    *cell = split_spans(std::mem::take(cell), false);
                }
            }
        }
        if let Some(children) = block.children_mut() {
            let taken = std::mem::take(children);
            *children = split_long_text(taken);
        }
        match block {
            Block::Paragraph { rich_text } if rich_text.len() > MAX_SPANS_PER_BLOCK => {
                out.extend(
                    rich_text
                        .into_iter()
                        .chunks(MAX_SPANS_PER_BLOCK)
                        .into_iter()
                        .map(|group| Block::paragraph(group.collect())),
                );
            }
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileConversion {
    pub path: PathBuf,
    pub file_name: String,
    /// BLAKE3 of the source, `None` when the file could not be read.
    pub content_hash: Option<String>,
    pub chunks: Vec<Vec<Block>>,
    pub warnings: Vec<Warning>,
}

impl FileConversion {
    pub fn block_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.chunks.iter().flatten()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read and convert one file. Read failures become a `file_error` warning.
pub async fn convert_file(path: &Path, options: &ConvertOptions) -> FileConversion {
    let file_name = file_name(path);
    match tokio::fs::read_to_string(path).await {
        Ok(markdown) => {
            let Conversion { chunks, warnings } = convert(&markdown, options);
            FileConversion {
                path: path.to_owned(),
                file_name,
                content_hash: Some(blake3::hash(markdown.as_bytes()).to_hex().to_string()),
                chunks,
                warnings,
            }
        }
        Err(error) => {
            warn!(%error, path = %path.display(), "failed to read markdown");
            FileConversion {
                path: path.to_owned(),
                file_name,
                content_hash: None,
                chunks: Vec::new(),
                warnings: vec![Warning::new(
                    WarningKind::FileError,
                    format!("failed to read file: {error}"),
                )],
            }
        }
    }
}

const PRIORITY_FILES: &[&str] = &["PROJECT.md", "ROADMAP.md", "STATE.md"];

/// Every `.md` file below `dir`, skipping hidden and dependency directories.
pub fn find_markdown_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !(name.starts_with('.') || name == "node_modules")
        })
        .filter_map(|entry| {
            entry
                .inspect_err(|error| warn!(%error, "failed to walk directory"))
                .ok()
        })
        .filter(|entry| {
            entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "md")
        })
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Priority documents first, then path order.
pub fn sort_files(files: &mut [PathBuf]) {
    files.sort_by(|a, b| {
        let rank = |path: &Path| {
            let name = file_name(path);
            PRIORITY_FILES
                .iter()
                .position(|priority| *priority == name)
                .unwrap_or(PRIORITY_FILES.len())
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryOptions {
    pub convert: ConvertOptions,
    /// Skip the warnings log and the conversion stats.
    pub dry_run: bool,
    pub log_path: Option<PathBuf>,
    pub stats_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct DirectoryConversion {
    pub files: Vec<FileConversion>,
    pub total_blocks: usize,
    pub total_warnings: usize,
}

/// Convert every markdown file under `dir` in priority order.
pub async fn convert_directory(
    dir: &Path,
    options: &DirectoryOptions,
    reporter: &dyn ProgressReporter,
) -> DirectoryConversion {
    let mut files = find_markdown_files(dir);
    sort_files(&mut files);
    reporter.set_phase(BatchPhase::ProcessingDocuments);
    reporter.register_entries(
        files
            .iter()
            .map(|path| path.strip_prefix(dir).unwrap_or(path).display().to_string())
            .collect(),
    );

    let stats_log = options
        .stats_path
        .as_deref()
        .filter(|_| !options.dry_run)
        .map(ConversionLog::new);
    let mut result = DirectoryConversion::default();
    for path in files {
        let entry = path.strip_prefix(dir).unwrap_or(&path).display().to_string();
        reporter.update_entry(&entry, EntryStatus::Converting);
        let conversion = convert_file(&path, &options.convert).await;
        debug!(file = %entry, blocks = conversion.block_count(), "converted");

        result.total_blocks += conversion.block_count();
        result.total_warnings += conversion.warnings.len();
        for warning in &conversion.warnings {
            reporter.log_warn(&format!("{entry}: {}", warning.message));
        }

        if !options.dry_run {
            if let Some(log_path) = &options.log_path {
                if let Err(error) =
                    warning::append_log(log_path, &conversion.file_name, &conversion.warnings).await
                {
                    warn!(%error, path = %log_path.display(), "failed to append warnings log");
                }
            }
        }
        if let (Some(log), Some(hash)) = (&stats_log, &conversion.content_hash) {
            if conversion.block_count() > 0 {
                let stats = ConversionStats::new(&entry, &conversion.chunks);
                if let Err(error) = log.record(hash, stats).await {
                    warn!(%error, "failed to record conversion stats");
                }
            }
        }

        let status = if conversion.content_hash.is_some() {
            EntryStatus::Done
        } else {
            EntryStatus::Failed(
                conversion
                    .warnings
                    .iter()
                    .map(|warning| warning.message.as_str())
                    .join("; "),
            )
        };
        reporter.update_entry(&entry, status);
        result.files.push(conversion);
    }
    reporter.set_phase(BatchPhase::Completed);
    result
}
