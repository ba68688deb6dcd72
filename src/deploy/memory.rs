//! An in-process block store.
//!
//! Behaves like the hosted store where sync logic can observe the difference:
//! unknown ids are `NotFound`, writes below archived pages fail validation,
//! oversized batches are rejected and listings paginate.

use std::sync::Mutex;

use indexmap::IndexMap;

use crate::{
    block::{Block, MAX_BLOCKS_PER_REQUEST},
    store::{self, BotUser, ChildBlock, Comment, Page, Paginated},
};

const ARCHIVED_MESSAGE: &str = "Can't edit block that is archived. You must unarchive the block before editing.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

/// Number of calls per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub retrieve_page: usize,
    pub create_page: usize,
    pub update_page_title: usize,
    pub append_children: usize,
    pub list_children: usize,
    pub archive_block: usize,
    pub create_file_upload: usize,
    pub list_comments: usize,
}

impl Calls {
    /// Calls that change remote content.
    pub fn mutations(&self) -> usize {
        self.create_page
            + self.update_page_title
            + self.append_children
            + self.archive_block
            + self.create_file_upload
    }
}

#[derive(Debug)]
struct PageRecord {
    parent_id: Option<String>,
    title: String,
    archived: bool,
}

#[derive(Debug)]
struct ChildRecord {
    id: String,
    kind: String,
    archived: bool,
    block: Option<Block>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    pages: IndexMap<String, PageRecord>,
    children: IndexMap<String, Vec<ChildRecord>>,
    comments: IndexMap<String, Vec<Comment>>,
    uploads: Vec<Upload>,
    deny_comments: bool,
    calls: Calls,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn writable_page(&self, page_id: &str) -> Result<&PageRecord, store::Error> {
        match self.pages.get(page_id) {
            None => Err(store::Error::NotFound(format!("Could not find page with ID: {page_id}"))),
            Some(page) if page.archived || self.has_archived_ancestor(page) => {
                Err(store::Error::Validation(ARCHIVED_MESSAGE.into()))
            }
            Some(page) => Ok(page),
        }
    }

    fn has_archived_ancestor(&self, page: &PageRecord) -> bool {
        let mut parent = page.parent_id.as_deref();
        while let Some(id) = parent {
            match self.pages.get(id) {
                Some(page) if page.archived => return true,
                Some(page) => parent = page.parent_id.as_deref(),
                None => return false,
            }
        }
        false
    }

    fn insert_blocks(&mut self, parent_id: &str, blocks: &[Block]) {
        for block in blocks {
            let id = self.next_id("block");
            let mut stored = block.clone();
            let nested = stored.take_children();
            self.children
                .entry(parent_id.to_owned())
                .or_default()
                .push(ChildRecord {
                    id: id.clone(),
                    kind: block.type_name().to_owned(),
                    archived: false,
                    block: Some(stored),
                });
            self.insert_blocks(&id, &nested);
        }
    }

    fn live_children(&self, parent_id: &str) -> impl Iterator<Item = &ChildRecord> {
        self.children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter(|child| !child.archived)
    }

    fn create_page(&mut self, parent_id: Option<&str>, title: &str) -> String {
        let id = self.next_id("page");
        self.pages.insert(
            id.clone(),
            PageRecord {
                parent_id: parent_id.map(str::to_owned),
                title: title.to_owned(),
                archived: false,
            },
        );
        if let Some(parent_id) = parent_id {
            self.children
                .entry(parent_id.to_owned())
                .or_default()
                .push(ChildRecord {
                    id: id.clone(),
                    kind: "child_page".into(),
                    archived: false,
                    block: None,
                });
        }
        id
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: 100,
        }
    }

    /// Listing page size, to exercise cursor handling.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add a top-level page, e.g. the workspace parent.
    pub fn add_page(&self, title: &str) -> String {
        self.inner.lock().unwrap().create_page(None, title)
    }

    pub fn archive_page(&self, page_id: &str) {
        if let Some(page) = self.inner.lock().unwrap().pages.get_mut(page_id) {
            page.archived = true;
        }
    }

    /// Remove a page entirely, as if deleted from the trash.
    pub fn delete_page(&self, page_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pages.shift_remove(page_id);
        inner.children.shift_remove(page_id);
        for children in inner.children.values_mut() {
            children.retain(|child| child.id != page_id);
        }
    }

    pub fn add_comment(&self, block_id: &str, text: &str) -> Comment {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id("comment");
        let comment = Comment {
            discussion_id: format!("discussion-{id}"),
            id,
            created_time: "2025-01-01T00:00:00.000Z".into(),
            created_by: "user-1".into(),
            text: text.to_owned(),
        };
        inner
            .comments
            .entry(block_id.to_owned())
            .or_default()
            .push(comment.clone());
        comment
    }

    /// Make comment listing fail as if the integration lacked the capability.
    pub fn deny_comments(&self) {
        self.inner.lock().unwrap().deny_comments = true;
    }

    pub fn page(&self, page_id: &str) -> Option<PageSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.pages.get(page_id).map(|page| PageSnapshot {
            id: page_id.to_owned(),
            parent_id: page.parent_id.clone(),
            title: page.title.clone(),
            archived: page.archived,
        })
    }

    /// Every page in creation order.
    pub fn pages(&self) -> Vec<PageSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .pages
            .iter()
            .map(|(id, page)| PageSnapshot {
                id: id.clone(),
                parent_id: page.parent_id.clone(),
                title: page.title.clone(),
                archived: page.archived,
            })
            .collect()
    }

    /// Live content blocks directly under a page, without nested children.
    pub fn blocks(&self, page_id: &str) -> Vec<Block> {
        let inner = self.inner.lock().unwrap();
        inner
            .live_children(page_id)
            .filter_map(|child| child.block.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.inner.lock().unwrap().uploads.clone()
    }

    pub fn calls(&self) -> Calls {
        self.inner.lock().unwrap().calls.clone()
    }

    fn paginate<T: Clone>(&self, items: Vec<T>, cursor: Option<&str>) -> Paginated<T> {
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let has_more = end < items.len();
        Paginated {
            results: items.get(start..end).map(<[T]>::to_vec).unwrap_or_default(),
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        }
    }
}

fn check_batch(children: &[Block]) -> Result<(), store::Error> {
    if children.len() > MAX_BLOCKS_PER_REQUEST {
        return Err(store::Error::Validation(format!(
            "body.children.length should be ≤ `{MAX_BLOCKS_PER_REQUEST}`, instead was `{}`.",
            children.len()
        )));
    }
    Ok(())
}

impl store::Client for MemoryStore {
    async fn retrieve_page(&self, page_id: &str) -> Result<Page, store::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.retrieve_page += 1;
        let page = inner
            .pages
            .get(page_id)
            .ok_or_else(|| store::Error::NotFound(format!("Could not find page with ID: {page_id}")))?;
        Ok(Page {
            id: page_id.to_owned(),
            archived: page.archived,
            title: page.title.clone(),
        })
    }

    async fn create_page(
        &self,
        parent_id: &str,
        title: &str,
        children: &[Block],
    ) -> Result<Page, store::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.create_page += 1;
        inner.writable_page(parent_id)?;
        check_batch(children)?;
        let id = inner.create_page(Some(parent_id), title);
        inner.insert_blocks(&id, children);
        Ok(Page {
            id,
            archived: false,
            title: title.to_owned(),
        })
    }

    async fn update_page_title(&self, page_id: &str, title: &str) -> Result<(), store::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.update_page_title += 1;
        inner.writable_page(page_id)?;
        if let Some(page) = inner.pages.get_mut(page_id) {
            page.title = title.to_owned();
        }
        Ok(())
    }

    async fn append_children(&self, block_id: &str, children: &[Block]) -> Result<(), store::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.append_children += 1;
        if inner.pages.contains_key(block_id) {
            inner.writable_page(block_id)?;
        } else if !inner.children.contains_key(block_id) {
            return Err(store::Error::NotFound(format!("Could not find block with ID: {block_id}")));
        }
        check_batch(children)?;
        inner.insert_blocks(block_id, children);
        Ok(())
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<ChildBlock>, store::Error> {
        let children: Vec<ChildBlock> = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.list_children += 1;
            if !inner.pages.contains_key(block_id)
                && !inner.children.values().flatten().any(|child| child.id == block_id)
            {
                return Err(store::Error::NotFound(format!(
                    "Could not find block with ID: {block_id}"
                )));
            }
            inner
                .live_children(block_id)
                .map(|child| ChildBlock {
                    id: child.id.clone(),
                    kind: child.kind.clone(),
                    has_children: child.kind != "child_page"
                        && inner.live_children(&child.id).next().is_some(),
                })
                .collect()
        };
        Ok(self.paginate(children, cursor))
    }

    async fn archive_block(&self, block_id: &str) -> Result<(), store::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.archive_block += 1;
        let mut found = false;
        for child in inner.children.values_mut().flatten() {
            if child.id == block_id {
                child.archived = true;
                found = true;
            }
        }
        if let Some(page) = inner.pages.get_mut(block_id) {
            page.archived = true;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(store::Error::NotFound(format!("Could not find block with ID: {block_id}")))
        }
    }

    async fn create_file_upload(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, store::Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.create_file_upload += 1;
        let id = inner.next_id("upload");
        inner.uploads.push(Upload {
            id: id.clone(),
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            size: bytes.len(),
        });
        Ok(id)
    }

    async fn list_comments(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<Paginated<Comment>, store::Error> {
        let comments = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.list_comments += 1;
            if inner.deny_comments {
                return Err(store::Error::Restricted(
                    "Insufficient permissions for this endpoint.".into(),
                ));
            }
            inner.comments.get(block_id).cloned().unwrap_or_default()
        };
        Ok(self.paginate(comments, cursor))
    }

    async fn me(&self) -> Result<BotUser, store::Error> {
        Ok(BotUser {
            id: "bot-1".into(),
            name: Some("memory".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::RichSpan, store::Client as _};

    fn para(text: &str) -> Block {
        Block::paragraph(vec![RichSpan::plain(text)])
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let store = MemoryStore::new().with_page_size(2);
        let root = store.add_page("Root");
        let page = store
            .create_page(&root, "Doc", &[para("a"), para("b"), para("c")])
            .await
            .unwrap();
        assert_eq!(store.page(&page.id).unwrap().parent_id.as_deref(), Some(root.as_str()));

        let first = store.list_children(&page.id, None).await.unwrap();
        assert_eq!(first.results.len(), 2);
        let second = store
            .list_children(&page.id, first.next_cursor())
            .await
            .unwrap();
        assert_eq!(second.results.len(), 1);
        assert!(!second.has_more);

        let root_children = store.list_children(&root, None).await.unwrap();
        assert!(root_children.results[0].is_subpage());
    }

    #[tokio::test]
    async fn test_archived_parent_rejects_writes() {
        let store = MemoryStore::new();
        let root = store.add_page("Root");
        let child = store.create_page(&root, "Child", &[]).await.unwrap();
        store.archive_page(&root);
        let error = store.append_children(&child.id, &[para("x")]).await.unwrap_err();
        assert!(error.is_archived());
        let error = store.create_page(&root, "Other", &[]).await.unwrap_err();
        assert!(error.is_archived());
    }

    #[tokio::test]
    async fn test_deleted_page_not_found() {
        let store = MemoryStore::new();
        let root = store.add_page("Root");
        store.delete_page(&root);
        assert!(store.retrieve_page(&root).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let store = MemoryStore::new();
        let root = store.add_page("Root");
        let blocks: Vec<_> = (0..101).map(|_| para("x")).collect();
        assert!(matches!(
            store.create_page(&root, "Big", &blocks).await,
            Err(store::Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_nested_children_are_listed() {
        let store = MemoryStore::new();
        let root = store.add_page("Root");
        let item = Block::BulletedListItem {
            rich_text: vec![RichSpan::plain("parent")],
            children: vec![para("child")],
        };
        store.append_children(&root, &[item]).await.unwrap();
        let listed = store.list_children(&root, None).await.unwrap();
        assert!(listed.results[0].has_children);
        let nested = store
            .list_children(&listed.results[0].id, None)
            .await
            .unwrap();
        assert_eq!(nested.results.len(), 1);
        assert_eq!(nested.results[0].kind, "paragraph");
    }
}
