//! The remote block store as seen by the rest of the crate.
//!
//! [`Client`] is the seam between sync logic and transport. `deploy::notion`
//! talks HTTP; `deploy::memory` keeps everything in process for tests and
//! previews.

use serde::{Deserialize, Serialize};

use crate::block::Block;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Restricted: {0}")]
    Restricted(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Writes below an archived ancestor fail validation with this wording.
    pub fn is_archived(&self) -> bool {
        match self {
            Error::Validation(message) => message.to_ascii_lowercase().contains("archived"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub id: String,
    pub archived: bool,
    pub title: String,
}

/// A direct child of a page or block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildBlock {
    pub id: String,
    pub kind: String,
    pub has_children: bool,
}

impl ChildBlock {
    /// Child pages and databases are owned by other sync units.
    pub fn is_subpage(&self) -> bool {
        matches!(self.kind.as_str(), "child_page" | "child_database")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Paginated<T> {
    pub fn single(results: Vec<T>) -> Self {
        Self {
            results,
            has_more: false,
            next_cursor: None,
        }
    }

    pub fn next_cursor(&self) -> Option<&str> {
        if self.has_more {
            self.next_cursor.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub discussion_id: String,
    pub created_time: String,
    pub created_by: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotUser {
    pub id: String,
    pub name: Option<String>,
}

pub trait Client: Send + Sync {
    fn retrieve_page(&self, page_id: &str) -> impl Future<Output = Result<Page, Error>> + Send;

    /// Create a page under `parent_id`. At most one batch of `children`.
    fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        children: &[Block],
    ) -> impl Future<Output = Result<Page, Error>> + Send;

    fn update_page_title(
        &self,
        page_id: &str,
        title: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn append_children(
        &self,
        block_id: &str,
        children: &[Block],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<Paginated<ChildBlock>, Error>> + Send;

    fn archive_block(&self, block_id: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Upload a file and return its upload id.
    fn create_file_upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String, Error>> + Send;

    /// Unresolved comments attached to a page or block.
    fn list_comments(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<Paginated<Comment>, Error>> + Send;

    fn me(&self) -> impl Future<Output = Result<BotUser, Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archived_detection() {
        let archived = Error::Validation("Can't edit block that is archived.".into());
        assert!(archived.is_archived());
        assert!(!Error::Validation("body.children should be defined".into()).is_archived());
        assert!(!Error::NotFound("x".into()).is_archived());
    }

    #[test]
    fn test_pagination_cursor() {
        let page = Paginated {
            results: vec![1],
            has_more: false,
            next_cursor: Some("c".into()),
        };
        assert_eq!(page.next_cursor(), None);
        let more = Paginated {
            results: vec![1],
            has_more: true,
            next_cursor: Some("c".into()),
        };
        assert_eq!(more.next_cursor(), Some("c"));
    }
}
