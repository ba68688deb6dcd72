//! Creating and replacing page content.

use tracing::{debug, info};

use crate::{
    block::{Block, MAX_BLOCKS_PER_REQUEST},
    store::{self, ChildBlock, Client, Page},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Parent page {0} not found or archived")]
    ParentMissing(String),
    #[error("Parent page {0} not accessible; share it with the integration")]
    ParentInaccessible(String),
    #[error("Page {0} not found; it may have been deleted")]
    PageNotFound(String),
    #[error(transparent)]
    Store(#[from] store::Error),
}

impl Error {
    /// The page or one of its ancestors is archived.
    pub fn is_archived(&self) -> bool {
        matches!(self, Error::Store(error) if error.is_archived())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    Live(Page),
    NotFound,
    Unauthorized,
    Archived,
}

impl PageStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, PageStatus::Live(_))
    }
}

/// Look a page up. Missing, inaccessible and archived pages are statuses,
/// anything else is an error.
pub async fn validate_page_exists<C: Client>(
    client: &C,
    page_id: &str,
) -> Result<PageStatus, store::Error> {
    match client.retrieve_page(page_id).await {
        Ok(page) if page.archived => Ok(PageStatus::Archived),
        Ok(page) => Ok(PageStatus::Live(page)),
        Err(store::Error::NotFound(_)) => Ok(PageStatus::NotFound),
        Err(store::Error::Unauthorized(_) | store::Error::Restricted(_)) => {
            Ok(PageStatus::Unauthorized)
        }
        Err(error) => Err(error),
    }
}

/// Every batch cut down to the per-request limit.
fn requests(batches: &[Vec<Block>]) -> impl Iterator<Item = &[Block]> {
    batches
        .iter()
        .flat_map(|batch| batch.chunks(MAX_BLOCKS_PER_REQUEST))
}

async fn append_all<'a, C: Client>(
    client: &C,
    page_id: &str,
    requests: impl Iterator<Item = &'a [Block]>,
) -> Result<(), Error> {
    for blocks in requests {
        client.append_children(page_id, blocks).await?;
    }
    Ok(())
}

/// Create a page under a live parent. The first batch goes with the create
/// call, the rest are appended in order.
pub async fn create_page<C: Client>(
    client: &C,
    parent_id: &str,
    title: &str,
    batches: &[Vec<Block>],
) -> Result<String, Error> {
    match validate_page_exists(client, parent_id).await? {
        PageStatus::Live(_) => {}
        PageStatus::NotFound | PageStatus::Archived => {
            return Err(Error::ParentMissing(parent_id.to_owned()));
        }
        PageStatus::Unauthorized => return Err(Error::ParentInaccessible(parent_id.to_owned())),
    }

    let mut requests = requests(batches);
    let first = requests.next().unwrap_or_default();
    let page = client.create_page(parent_id, title, first).await?;
    append_all(client, &page.id, requests).await?;
    info!(page_id = %page.id, parent_id, title, "created page");
    Ok(page.id)
}

/// All direct children of a block, across every listing page.
pub async fn list_all_children<C: Client>(
    client: &C,
    block_id: &str,
) -> Result<Vec<ChildBlock>, store::Error> {
    let mut children = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = client.list_children(block_id, cursor.as_deref()).await?;
        cursor = page.next_cursor().map(str::to_owned);
        children.extend(page.results);
        if cursor.is_none() {
            return Ok(children);
        }
    }
}

/// Retitle a page and replace its content. Nested pages and databases are
/// left in place.
pub async fn update_page<C: Client>(
    client: &C,
    page_id: &str,
    title: &str,
    batches: &[Vec<Block>],
) -> Result<String, Error> {
    client
        .update_page_title(page_id, title)
        .await
        .map_err(|error| match error {
            store::Error::NotFound(_) => Error::PageNotFound(page_id.to_owned()),
            other => Error::Store(other),
        })?;

    let stale: Vec<ChildBlock> = list_all_children(client, page_id)
        .await?
        .into_iter()
        .filter(|child| !child.is_subpage())
        .collect();
    debug!(page_id, count = stale.len(), "archiving previous content");
    for child in &stale {
        client.archive_block(&child.id).await?;
    }

    append_all(client, page_id, requests(batches)).await?;
    info!(page_id, title, "updated page");
    Ok(page_id.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::RichSpan, deploy::memory::MemoryStore};

    fn paragraphs(n: usize) -> Vec<Block> {
        (0..n)
            .map(|i| Block::paragraph(vec![RichSpan::plain(format!("p{i}"))]))
            .collect()
    }

    #[tokio::test]
    async fn test_status() {
        let store = MemoryStore::new();
        let live = store.add_page("Live");
        let archived = store.add_page("Archived");
        store.archive_page(&archived);
        assert!(validate_page_exists(&store, &live).await.unwrap().is_live());
        assert_eq!(
            validate_page_exists(&store, &archived).await.unwrap(),
            PageStatus::Archived
        );
        assert_eq!(
            validate_page_exists(&store, "missing").await.unwrap(),
            PageStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_create_in_batches() {
        let store = MemoryStore::new();
        let parent = store.add_page("Parent");
        let blocks = paragraphs(250);
        let page_id = create_page(&store, &parent, "Big", &[blocks.clone()])
            .await
            .unwrap();
        assert_eq!(store.blocks(&page_id), blocks);
        let calls = store.calls();
        assert_eq!(calls.create_page, 1);
        assert_eq!(calls.append_children, 2);
    }

    #[tokio::test]
    async fn test_create_under_missing_parent() {
        let store = MemoryStore::new();
        let error = create_page(&store, "gone", "Doc", &[]).await.unwrap_err();
        assert!(matches!(error, Error::ParentMissing(_)));
        assert_eq!(store.calls().create_page, 0);
    }

    #[tokio::test]
    async fn test_update_replaces_content_and_keeps_subpages() {
        let store = MemoryStore::new().with_page_size(3);
        let parent = store.add_page("Parent");
        let page_id = create_page(&store, &parent, "Doc", &[paragraphs(7)])
            .await
            .unwrap();
        let nested = create_page(&store, &page_id, "Nested", &[]).await.unwrap();

        let fresh = vec![Block::Divider, Block::paragraph(vec![RichSpan::plain("new")])];
        update_page(&store, &page_id, "Doc v2", &[fresh.clone()])
            .await
            .unwrap();
        assert_eq!(store.blocks(&page_id), fresh);
        assert_eq!(store.page(&page_id).unwrap().title, "Doc v2");
        assert!(!store.page(&nested).unwrap().archived);
        let children = list_all_children(&store, &page_id).await.unwrap();
        assert_eq!(children.iter().filter(|c| c.is_subpage()).count(), 1);
    }

    #[tokio::test]
    async fn test_update_deleted_page() {
        let store = MemoryStore::new();
        let error = update_page(&store, "gone", "Doc", &[]).await.unwrap_err();
        assert!(matches!(error, Error::PageNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_under_archived_ancestor() {
        let store = MemoryStore::new();
        let parent = store.add_page("Parent");
        let page_id = create_page(&store, &parent, "Doc", &[]).await.unwrap();
        store.archive_page(&parent);
        let error = update_page(&store, &page_id, "Doc", &[]).await.unwrap_err();
        assert!(error.is_archived());
    }
}
