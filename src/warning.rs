//! Warning collection for document conversion.
//!
//! Warnings raised while a document is being converted are gathered in a
//! task-local collector so they can be attributed to that document, reported,
//! and appended to the JSON-lines warnings log.

use std::{cell::RefCell, path::Path};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Content exceeded a store limit and had to be split.
    ParserLimit,
    /// Conversion failed; the document was emitted verbatim as code.
    ConversionError,
    /// The document could not be read.
    FileError,
    /// A referenced image was missing, too large, or of an unsupported type.
    ImageInvalid,
    ImageUploadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

tokio::task_local! {
    static WARNINGS: RefCell<Vec<Warning>>;
}

/// Collect a warning for the current document.
/// If called outside of a collection scope, the warning is ignored.
pub fn collect(kind: WarningKind, message: impl Into<String>) {
    let _ = WARNINGS.try_with(|warnings| {
        warnings.borrow_mut().push(Warning::new(kind, message));
    });
}

/// Run a future with warning collection enabled, returning the collected warnings.
pub async fn collect_warnings<F, T>(f: F) -> (T, Vec<Warning>)
where
    F: std::future::Future<Output = T>,
{
    WARNINGS
        .scope(RefCell::new(Vec::new()), async {
            let result = f.await;
            let warnings = WARNINGS.with(|w| std::mem::take(&mut *w.borrow_mut()));
            (result, warnings)
        })
        .await
}

/// Synchronous counterpart of [`collect_warnings`].
pub fn collect_warnings_sync<F, T>(f: F) -> (T, Vec<Warning>)
where
    F: FnOnce() -> T,
{
    WARNINGS.sync_scope(RefCell::new(Vec::new()), || {
        let result = f();
        let warnings = WARNINGS.with(|w| std::mem::take(&mut *w.borrow_mut()));
        (result, warnings)
    })
}

/// Emit a warning that will be collected for the current document.
#[macro_export]
macro_rules! warn_entry {
    ($kind:expr, $($arg:tt)*) => {
        $crate::warning::collect($kind, format!($($arg)*))
    };
}

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: DateTime<Utc>,
    file: &'a str,
    #[serde(rename = "type")]
    kind: WarningKind,
    message: &'a str,
}

/// Append one JSON line per warning to `log_path`, creating parent directories.
pub async fn append_log(log_path: &Path, file: &str, warnings: &[Warning]) -> std::io::Result<()> {
    if warnings.is_empty() {
        return Ok(());
    }
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let timestamp = Utc::now();
    let mut lines = String::new();
    for warning in warnings {
        let line = serde_json::to_string(&LogLine {
            timestamp,
            file,
            kind: warning.kind,
            message: &warning.message,
        })?;
        lines.push_str(&line);
        lines.push('\n');
    }
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    log.write_all(lines.as_bytes()).await?;
    log.flush().await
}
