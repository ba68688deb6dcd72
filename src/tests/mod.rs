use std::path::Path;

use crate::{
    ErrorDetail,
    block::{Block, ImageSource},
    deploy::memory::{Calls, MemoryStore},
    progress::NullReporter,
    state::{StateStore, SyncState},
    sync::{self, SyncOptions},
};

async fn write(root: &Path, path: &str, content: impl AsRef<[u8]>) {
    let path = root.join(path);
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, content).await.unwrap();
}

/// Root document, two priority documents and one phase folder with two plans.
async fn planning_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, ".planning/PROJECT.md", "# Acme Billing\n\nInvoices for everyone.\n").await;
    write(root, ".planning/ROADMAP.md", "# Roadmap\n\n- [ ] Phase 1\n").await;
    write(root, ".planning/STATE.md", "# State\n\nOn track.\n").await;
    write(root, ".planning/phases/01-setup/01-PLAN.md", "# Plan\n\nSet up CI.\n").await;
    write(root, ".planning/phases/01-setup/01-SUMMARY.md", "# Summary\n\nDone.\n").await;
    dir
}

fn options(cwd: &Path, parent: &str) -> SyncOptions {
    SyncOptions {
        cwd: cwd.to_owned(),
        parent_page_id: Some(parent.to_owned()),
        ..Default::default()
    }
}

async fn load_state(cwd: &Path) -> SyncState {
    StateStore::for_cwd(cwd).load().await.unwrap()
}

fn doc_page_id(state: &SyncState, key: &str) -> String {
    state
        .doc_page(sync::DEFAULT_PROJECT, key)
        .unwrap()
        .page_id()
        .to_owned()
}

#[tokio::test]
async fn test_tree_is_created_in_order() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");

    let report = sync::sync_project(&store, &options(dir.path(), &workspace), &NullReporter)
        .await
        .unwrap();
    assert_eq!(report.total, 6);
    assert_eq!(report.created, 6);
    assert_eq!(report.errors, 0);

    let pages = store.pages();
    let titles: Vec<_> = pages.iter().map(|page| page.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Workspace",
            "Acme Billing",
            "ROADMAP",
            "STATE",
            "Phase 01 - Setup",
            "01-PLAN",
            "01-SUMMARY"
        ]
    );
    let root = &pages[1];
    let phase = &pages[4];
    assert_eq!(root.parent_id.as_deref(), Some(workspace.as_str()));
    assert_eq!(pages[2].parent_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(phase.parent_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(pages[5].parent_id.as_deref(), Some(phase.id.as_str()));
    assert_eq!(pages[6].parent_id.as_deref(), Some(phase.id.as_str()));

    let state = load_state(dir.path()).await;
    assert_eq!(state.workspace_page_id.as_deref(), Some(workspace.as_str()));
    let project = state.project(sync::DEFAULT_PROJECT).unwrap();
    assert_eq!(project.root_page_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(project.phase_pages["phases/01-setup"], phase.id);
    assert_eq!(doc_page_id(&state, ".planning/phases/01-setup/01-PLAN.md"), pages[5].id);
    assert!(
        project
            .doc_pages
            .values()
            .all(|page| page.content_hash().is_some())
    );
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");
    let options = options(dir.path(), &workspace);

    sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    let mutations = store.calls().mutations();
    let report = sync::sync_project(&store, &options, &NullReporter).await.unwrap();

    assert_eq!(report.skipped, 6);
    assert_eq!(report.created + report.updated + report.errors, 0);
    assert_eq!(store.calls().mutations(), mutations);
}

#[tokio::test]
async fn test_changed_document_is_updated_in_place() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");
    let options = options(dir.path(), &workspace);

    sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    let before = load_state(dir.path()).await;
    let page_id = doc_page_id(&before, ".planning/STATE.md");

    write(dir.path(), ".planning/STATE.md", "# State\n\nBlocked on review.\n").await;
    let report = sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 5);

    let after = load_state(dir.path()).await;
    assert_eq!(doc_page_id(&after, ".planning/STATE.md"), page_id);
    let text: String = store.blocks(&page_id).iter().map(Block::plain_text).collect();
    assert!(text.contains("Blocked on review."));
    assert!(!text.contains("On track."));
}

#[tokio::test]
async fn test_deleted_page_is_recreated() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");
    let options = options(dir.path(), &workspace);

    sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    let stale = doc_page_id(&load_state(dir.path()).await, ".planning/ROADMAP.md");
    store.delete_page(&stale);

    write(dir.path(), ".planning/ROADMAP.md", "# Roadmap\n\n- [x] Phase 1\n").await;
    let report = sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.errors, 0);

    let state = load_state(dir.path()).await;
    let fresh = doc_page_id(&state, ".planning/ROADMAP.md");
    assert_ne!(fresh, stale);
    let root = state
        .project(sync::DEFAULT_PROJECT)
        .unwrap()
        .root_page_id
        .clone();
    assert_eq!(store.page(&fresh).unwrap().parent_id, root);
}

#[tokio::test]
async fn test_archived_ancestor_is_recreated() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");
    let options = options(dir.path(), &workspace);

    sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    let state = load_state(dir.path()).await;
    let old_phase = state.project(sync::DEFAULT_PROJECT).unwrap().phase_pages["phases/01-setup"].clone();
    let old_plan = doc_page_id(&state, ".planning/phases/01-setup/01-PLAN.md");
    store.archive_page(&old_phase);

    write(dir.path(), ".planning/phases/01-setup/01-PLAN.md", "# Plan\n\nSet up CD.\n").await;
    let report = sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    assert_eq!(report.errors, 0);
    assert_eq!(report.created, 2);

    let state = load_state(dir.path()).await;
    let new_phase = state.project(sync::DEFAULT_PROJECT).unwrap().phase_pages["phases/01-setup"].clone();
    let new_plan = doc_page_id(&state, ".planning/phases/01-setup/01-PLAN.md");
    assert_ne!(new_phase, old_phase);
    assert_ne!(new_plan, old_plan);
    assert_eq!(store.page(&new_plan).unwrap().parent_id, Some(new_phase));
}

#[tokio::test]
async fn test_shared_image_is_uploaded_once() {
    let dir = planning_tree().await;
    write(dir.path(), ".planning/assets/logo.png", [0x89, b'P', b'N', b'G', 1, 2, 3]).await;
    write(
        dir.path(),
        ".planning/PROJECT.md",
        "# Acme Billing\n\n![logo](assets/logo.png)\n",
    )
    .await;
    write(
        dir.path(),
        ".planning/ROADMAP.md",
        "# Roadmap\n\n![logo](assets/logo.png)\n\n![missing](assets/gone.png)\n",
    )
    .await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");

    let report = sync::sync_project(&store, &options(dir.path(), &workspace), &NullReporter)
        .await
        .unwrap();
    assert_eq!(report.errors, 0);
    assert_eq!(report.images_uploaded, 1);
    assert_eq!(report.images_cached, 1);
    assert_eq!(report.images_failed, 1);
    let uploads = store.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].content_type, "image/png");

    let state = load_state(dir.path()).await;
    let project = state.project(sync::DEFAULT_PROJECT).unwrap();
    assert_eq!(project.image_uploads.len(), 1);
    let roadmap = doc_page_id(&state, ".planning/ROADMAP.md");
    let blocks = store.blocks(&roadmap);
    assert!(blocks.iter().any(
        |block| matches!(block, Block::Image(ImageSource::FileUpload { id }) if *id == uploads[0].id)
    ));
    let text: String = blocks.iter().map(Block::plain_text).collect();
    assert!(text.contains("[Image unavailable: assets/gone.png - not_found]"));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();
    let mut options = options(dir.path(), "workspace-page");
    options.dry_run = true;

    let report = sync::sync_project(&store, &options, &NullReporter).await.unwrap();
    assert_eq!(report.errors, 0);
    assert_eq!(report.created, 6);
    assert_eq!(report.previews.len(), 5);
    assert!(report.previews.iter().all(|preview| preview.blocks > 0));
    assert_eq!(store.calls(), Calls::default());
    assert!(!dir.path().join(".planning/notion-sync.json").exists());
    assert!(!dir.path().join(".planning/logs").exists());
}

#[tokio::test]
async fn test_failed_document_does_not_stop_the_run() {
    let dir = planning_tree().await;
    write(dir.path(), ".planning/STATE.md", [0xff, 0xfe, 0x00, 0x80]).await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");

    let report = sync::sync_project(&store, &options(dir.path(), &workspace), &NullReporter)
        .await
        .unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.created, 5);
    assert_eq!(report.error_details[0].file, ".planning/STATE.md");

    let state = load_state(dir.path()).await;
    assert!(state.doc_page(sync::DEFAULT_PROJECT, ".planning/STATE.md").is_none());
    assert!(state.doc_page(sync::DEFAULT_PROJECT, ".planning/ROADMAP.md").is_some());
}

#[tokio::test]
async fn test_children_fail_when_root_cannot_be_created() {
    let dir = planning_tree().await;
    let store = MemoryStore::new();

    let report = sync::sync_project(&store, &options(dir.path(), "no-such-page"), &NullReporter)
        .await
        .unwrap();
    assert_eq!(report.errors, 6);
    assert_eq!(store.calls().mutations(), 0);
}

#[tokio::test]
async fn test_input_errors_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let error = sync::sync_project(&store, &options(dir.path(), "page"), &NullReporter)
        .await
        .unwrap_err();
    assert!(matches!(*error.detail, ErrorDetail::RootDocumentMissing));

    let dir = planning_tree().await;
    let error = sync::sync_project(
        &store,
        &SyncOptions {
            cwd: dir.path().to_owned(),
            ..Default::default()
        },
        &NullReporter,
    )
    .await
    .unwrap_err();
    assert!(matches!(*error.detail, ErrorDetail::MissingParentPage));

    write(dir.path(), ".planning/notion-sync.json", "{ not json").await;
    let error = sync::sync_project(&store, &options(dir.path(), "page"), &NullReporter)
        .await
        .unwrap_err();
    assert!(matches!(*error.detail, ErrorDetail::ParseState(_)));
}

#[tokio::test]
async fn test_active_project_keys_state() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), ".planning/.active-project", "billing\n").await;
    write(dir.path(), ".planning/billing/PROJECT.md", "# Billing\n").await;
    write(dir.path(), ".planning/billing/ROADMAP.md", "# Roadmap\n").await;
    let store = MemoryStore::new();
    let workspace = store.add_page("Workspace");

    let report = sync::sync_project(&store, &options(dir.path(), &workspace), &NullReporter)
        .await
        .unwrap();
    assert_eq!(report.created, 2);
    let state = load_state(dir.path()).await;
    let project = state.project("billing").unwrap();
    assert!(project.doc_pages.contains_key(".planning/billing/ROADMAP.md"));
    assert!(state.project(sync::DEFAULT_PROJECT).is_none());
}
