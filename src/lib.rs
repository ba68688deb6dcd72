use std::path::PathBuf;

pub mod block;
pub mod change;
pub mod comments;
pub mod config;
pub mod convert;
pub mod deploy;
pub mod hierarchy;
pub mod image;
pub mod page;
pub mod progress;
pub mod state;
pub mod store;
pub mod sync;
pub mod warning;

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
#[error("{context}: {detail}")]
pub struct Error {
    pub context: Box<ErrorContext>,
    pub detail: Box<ErrorDetail>,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub path: PathBuf,
    pub project: Option<String>,
}

impl ErrorContext {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            project: None,
        }
    }

    pub(crate) fn with_project(&self, project: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            project: Some(project.into()),
        }
    }

    pub(crate) fn error(&self, detail: ErrorDetail) -> Error {
        Error {
            context: Box::new(self.clone()),
            detail: Box::new(detail),
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{project}({})", self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorDetail {
    #[error("Failed to read document: {0}")]
    ReadDocument(std::io::Error),
    #[error("Failed to read directory: {0}")]
    ReadDirectory(walkdir::Error),
    #[error("Root document PROJECT.md is missing")]
    RootDocumentMissing,
    #[error("Failed to read sync state: {0}")]
    ReadState(std::io::Error),
    #[error("Failed to parse sync state: {0}")]
    ParseState(serde_json::Error),
    #[error("Failed to encode sync state: {0}")]
    EncodeState(serde_json::Error),
    #[error("Failed to write sync state: {0}")]
    WriteState(std::io::Error),
    #[error("Unsupported sync state version {0}")]
    UnsupportedStateVersion(u32),
    #[error("No parent page configured; pass --parent or set notion.parent_page_id")]
    MissingParentPage,
    #[error("Failed to read config: {0}")]
    ReadConfig(std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseConfig(serde_yaml::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
