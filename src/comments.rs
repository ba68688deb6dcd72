//! Pulling open review comments back from synced pages.
//!
//! Pages are independent of each other here, so they are fetched with a
//! bounded number of requests in flight. Results keep the order of the state
//! document regardless of completion order.

use futures::{
    StreamExt as _, TryStreamExt as _,
    future::{BoxFuture, FutureExt as _},
    stream,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    page::{self, PageStatus},
    progress::{BatchPhase, EntryStatus, ProgressReporter},
    state::SyncState,
    store::{self, Client, Comment},
};

pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing read comment permission. Grant 'Read comments' to the integration at https://www.notion.so/my-integrations")]
    MissingPermission,
    #[error(transparent)]
    Store(#[from] store::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub file_path: String,
    pub page_title: Option<String>,
}

/// A page whose comments could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageIssue {
    pub file_path: String,
    pub page_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommentReport {
    pub comments: Vec<PageComment>,
    /// Pages fetched successfully.
    pub pages: usize,
    /// Pages that no longer exist or are not shared.
    pub skipped: usize,
    pub errors: Vec<PageIssue>,
}

enum PageResult {
    Fetched(Vec<PageComment>),
    Skipped(PageIssue),
    Failed(PageIssue),
}

/// Every block id below `block_id`, not descending into nested pages.
pub fn list_all_block_ids<'a, C: Client>(
    client: &'a C,
    block_id: &'a str,
    concurrency: usize,
) -> BoxFuture<'a, Result<Vec<String>, store::Error>> {
    async move {
        let children = page::list_all_children(client, block_id).await?;
        let mut ids: Vec<String> = children.iter().map(|child| child.id.clone()).collect();
        let pending: Vec<BoxFuture<'_, Result<Vec<String>, store::Error>>> = children
            .iter()
            .filter(|child| child.has_children && !child.is_subpage())
            .map(|child| list_all_block_ids(client, &child.id, concurrency))
            .collect();
        let nested: Vec<Vec<String>> = stream::iter(pending)
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;
        ids.extend(nested.into_iter().flatten());
        Ok(ids)
    }
    .boxed()
}

/// All comments on one block, following cursors.
pub async fn fetch_block_comments<C: Client>(
    client: &C,
    block_id: &str,
) -> Result<Vec<Comment>, Error> {
    let mut comments = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = client
            .list_comments(block_id, cursor.as_deref())
            .await
            .map_err(|error| match error {
                store::Error::Restricted(_) => Error::MissingPermission,
                other => Error::Store(other),
            })?;
        cursor = page.next_cursor().map(str::to_owned);
        comments.extend(page.results);
        if cursor.is_none() {
            return Ok(comments);
        }
    }
}

/// Comments on a page and on every block inside it.
pub async fn fetch_page_comments<C: Client>(
    client: &C,
    page_id: &str,
    concurrency: usize,
) -> Result<Vec<Comment>, Error> {
    let mut ids = vec![page_id.to_owned()];
    ids.extend(list_all_block_ids(client, page_id, concurrency).await?);
    let comments: Vec<Vec<Comment>> = stream::iter(ids.iter())
        .map(|id| fetch_block_comments(client, id))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;
    Ok(comments.into_iter().flatten().collect())
}

async fn fetch_page<C: Client>(
    client: &C,
    file_path: &str,
    page_id: &str,
    concurrency: usize,
) -> PageResult {
    let issue = |reason: String| PageIssue {
        file_path: file_path.to_owned(),
        page_id: page_id.to_owned(),
        reason,
    };
    let page = match page::validate_page_exists(client, page_id).await {
        Ok(PageStatus::Live(page)) => page,
        Ok(PageStatus::NotFound | PageStatus::Archived) => {
            return PageResult::Skipped(issue("Page deleted or archived".into()));
        }
        Ok(PageStatus::Unauthorized) => {
            return PageResult::Skipped(issue("Page not accessible (missing permissions)".into()));
        }
        Err(error) => return PageResult::Failed(issue(error.to_string())),
    };
    match fetch_page_comments(client, page_id, concurrency).await {
        Ok(comments) => {
            debug!(file_path, page_id, count = comments.len(), "fetched comments");
            let page_title = Some(page.title).filter(|title| !title.is_empty());
            PageResult::Fetched(
                comments
                    .into_iter()
                    .map(|comment| PageComment {
                        comment,
                        file_path: file_path.to_owned(),
                        page_title: page_title.clone(),
                    })
                    .collect(),
            )
        }
        Err(error) => {
            warn!(%error, file_path, page_id, "failed to fetch comments");
            PageResult::Failed(issue(error.to_string()))
        }
    }
}

/// Open comments across every page recorded for `project`.
pub async fn retrieve_comments<C: Client>(
    client: &C,
    state: &SyncState,
    project: &str,
    concurrency: usize,
    reporter: &dyn ProgressReporter,
) -> CommentReport {
    let Some(project_state) = state.project(project) else {
        return CommentReport::default();
    };
    let pages: Vec<(&str, &str)> = project_state
        .doc_pages
        .iter()
        .map(|(file, record)| (file.as_str(), record.page_id()))
        .filter(|(_, page_id)| !page_id.is_empty())
        .collect();
    reporter.set_phase(BatchPhase::FetchingComments);
    reporter.register_entries(pages.iter().map(|(file, _)| (*file).to_owned()).collect());

    let results: Vec<PageResult> = stream::iter(pages.iter())
        .map(|(file, page_id)| async move {
            reporter.update_entry(file, EntryStatus::Fetching);
            let result = fetch_page(client, file, page_id, concurrency).await;
            let status = match &result {
                PageResult::Fetched(_) => EntryStatus::Done,
                PageResult::Skipped(_) => EntryStatus::Skipped,
                PageResult::Failed(issue) => EntryStatus::Failed(issue.reason.clone()),
            };
            reporter.update_entry(file, status);
            result
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    reporter.set_phase(BatchPhase::Completed);
    let mut report = CommentReport::default();
    for result in results {
        match result {
            PageResult::Fetched(comments) => {
                report.pages += 1;
                report.comments.extend(comments);
            }
            PageResult::Skipped(issue) => {
                report.skipped += 1;
                report.errors.push(issue);
            }
            PageResult::Failed(issue) => report.errors.push(issue),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{Block, RichSpan},
        deploy::memory::MemoryStore,
        progress::NullReporter,
    };

    fn nested_item() -> Block {
        Block::BulletedListItem {
            rich_text: vec![RichSpan::plain("parent")],
            children: vec![Block::paragraph(vec![RichSpan::plain("child")])],
        }
    }

    async fn setup() -> (MemoryStore, SyncState, String) {
        let store = MemoryStore::new().with_page_size(1);
        let root = store.add_page("Workspace");
        let page = store
            .create_page(&root, "Roadmap", &[nested_item(), Block::Divider])
            .await
            .unwrap();
        let mut state = SyncState::default();
        state.set_doc_page("alpha", ".planning/ROADMAP.md", &page.id, "h");
        (store, state, page.id)
    }

    #[tokio::test]
    async fn test_collects_page_and_nested_block_comments() {
        let (store, mut state, page_id) = setup().await;
        let ids = list_all_block_ids(&store, &page_id, 5).await.unwrap();
        assert_eq!(ids.len(), 3);
        store.add_comment(&page_id, "page level");
        store.add_comment(&ids[2], "on nested child");
        store.add_comment(&ids[2], "second");

        let gone = store.add_page("Gone");
        store.delete_page(&gone);
        state.set_doc_page("alpha", ".planning/STATE.md", &gone, "h");

        let report = retrieve_comments(&store, &state, "alpha", 2, &NullReporter).await;
        let texts: Vec<_> = report
            .comments
            .iter()
            .map(|c| c.comment.text.as_str())
            .collect();
        assert_eq!(texts, vec!["page level", "on nested child", "second"]);
        assert!(report.comments.iter().all(|c| c.file_path == ".planning/ROADMAP.md"));
        assert_eq!(report.comments[0].page_title.as_deref(), Some("Roadmap"));
        assert_eq!(report.pages, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors[0].reason, "Page deleted or archived");
    }

    #[tokio::test]
    async fn test_missing_permission_is_descriptive() {
        let (store, state, _) = setup().await;
        store.deny_comments();
        let report = retrieve_comments(&store, &state, "alpha", 5, &NullReporter).await;
        assert_eq!(report.pages, 0);
        assert!(report.errors[0].reason.starts_with("Missing read comment permission"));
        assert!(report.errors[0].reason.contains("https://www.notion.so/my-integrations"));
    }

    #[tokio::test]
    async fn test_unknown_project_is_empty() {
        let (store, state, _) = setup().await;
        let report = retrieve_comments(&store, &state, "beta", 5, &NullReporter).await;
        assert_eq!(report, CommentReport::default());
    }
}
