//! Syncing a planning directory to the store.
//!
//! Nodes are processed one at a time in hierarchy order, since a node's parent
//! page may only exist once the previous node has been written. Each node
//! ends in its own `Result`; a failure is recorded in the report and the run
//! moves on. State is saved after every node that changed it, so an
//! interrupted run resumes from the last success.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    Error, ErrorContext, ErrorDetail, change,
    convert::{self, ChunkOptions, ConvertOptions},
    hierarchy::{self, NodeKind, ParentKey, SyncItem},
    image::{self, ImageOutcome, ImagePipeline},
    page,
    progress::{BatchPhase, EntryStatus, ProgressReporter},
    state::{PLANNING_DIR, StateStore, SyncState},
    store::{self, Client},
    warning,
};

pub const DEFAULT_PROJECT: &str = "default";
pub const ACTIVE_PROJECT_FILE: &str = ".active-project";
pub const LOG_FILE: &str = "logs/notion-sync.jsonl";
const DRY_RUN_PAGE_PREFIX: &str = "dry-run-page:";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub cwd: PathBuf,
    /// Explicit project slug; otherwise the active project or `default`.
    pub project: Option<String>,
    /// Workspace page the root page is created under. Falls back to the one
    /// recorded in state.
    pub parent_page_id: Option<String>,
    pub dry_run: bool,
    pub chunk: ChunkOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLocation {
    pub planning_dir: PathBuf,
    pub slug: String,
}

/// Find the document root and the state slug for `cwd`.
///
/// `.planning/.active-project` may name a project living in
/// `.planning/<slug>/`. Without one, documents live directly in `.planning`
/// and `requested` (or `default`) keys the state.
pub async fn resolve_project(cwd: &Path, requested: Option<&str>) -> ProjectLocation {
    let planning_root = cwd.join(PLANNING_DIR);
    let active = tokio::fs::read_to_string(planning_root.join(ACTIVE_PROJECT_FILE))
        .await
        .ok()
        .map(|content| content.trim().to_owned())
        .filter(|slug| !slug.is_empty());
    if let Some(slug) = active {
        let nested = planning_root.join(&slug);
        if nested.join(hierarchy::ROOT_DOCUMENT).is_file() {
            return ProjectLocation {
                planning_dir: nested,
                slug,
            };
        }
        debug!(%slug, "active project has no root document, ignoring");
    }
    ProjectLocation {
        planning_dir: planning_root,
        slug: requested.unwrap_or(DEFAULT_PROJECT).to_owned(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Parent page for {0} is not known yet")]
    MissingParent(String),
    #[error("Failed to read document: {0}")]
    Read(std::io::Error),
    #[error(transparent)]
    Image(#[from] image::Error),
    #[error(transparent)]
    Page(#[from] page::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    State(#[from] Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Created { page_id: String },
    Updated { page_id: String },
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
}

/// What a dry run would write for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub file: String,
    pub action: Action,
    pub blocks: usize,
    pub chunks: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_details: Vec<NodeFailure>,
    pub images_uploaded: usize,
    pub images_cached: usize,
    pub images_failed: usize,
    pub image_details: Vec<ImageOutcome>,
    pub previews: Vec<Preview>,
}

struct Syncer<'a, C> {
    client: &'a C,
    store: StateStore,
    slug: String,
    workspace_page_id: String,
    log_path: PathBuf,
    options: &'a SyncOptions,
    reporter: &'a dyn ProgressReporter,
}

fn simulated_page_id(key: &str) -> String {
    format!("{DRY_RUN_PAGE_PREFIX}{key}")
}

impl<C: Client> Syncer<'_, C> {
    fn parent_page_id(&self, item: &SyncItem, state: &SyncState) -> Result<String, NodeError> {
        let project = state.project(&self.slug);
        let parent = match &item.parent {
            ParentKey::Workspace => Some(self.workspace_page_id.clone()),
            ParentKey::Root => project.and_then(|p| p.root_page_id.clone()),
            ParentKey::Folder(key) => project.and_then(|p| p.phase_pages.get(key).cloned()),
        };
        parent.ok_or_else(|| NodeError::MissingParent(item.key.clone()))
    }

    /// A recorded page still usable as a write target.
    async fn is_live(&self, page_id: &str) -> Result<bool, NodeError> {
        let status = page::validate_page_exists(self.client, page_id).await?;
        if !status.is_live() {
            info!(page_id, ?status, "recorded page is gone, recreating");
        }
        Ok(status.is_live())
    }

    async fn sync_folder(
        &self,
        item: &SyncItem,
        state: &mut SyncState,
    ) -> Result<NodeOutcome, NodeError> {
        let parent_id = self.parent_page_id(item, state)?;
        let existing = state
            .project(&self.slug)
            .and_then(|p| p.phase_pages.get(&item.key).cloned());
        if let Some(page_id) = existing {
            if self.options.dry_run || self.is_live(&page_id).await? {
                return Ok(NodeOutcome::Skipped);
            }
            state.project_mut(&self.slug).phase_pages.shift_remove(&item.key);
        }

        let page_id = if self.options.dry_run {
            simulated_page_id(&item.key)
        } else {
            page::create_page(self.client, &parent_id, &item.title, &[]).await?
        };
        state
            .project_mut(&self.slug)
            .phase_pages
            .insert(item.key.clone(), page_id.clone());
        self.store.save(state).await?;
        Ok(NodeOutcome::Created { page_id })
    }

    async fn sync_file(
        &self,
        item: &SyncItem,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) -> Result<NodeOutcome, NodeError> {
        let check = change::needs_sync(&item.path, &item.key, state, &self.slug)
            .await
            .map_err(NodeError::Read)?;
        debug!(file = %item.key, reason = ?check.reason, "change check");
        if !check.needs_sync {
            if item.is_root {
                let page_id = state
                    .doc_page(&self.slug, &item.key)
                    .map(|page| page.page_id().to_owned());
                state.project_mut(&self.slug).root_page_id = page_id;
            }
            return Ok(NodeOutcome::Skipped);
        }
        let parent_id = self.parent_page_id(item, state)?;

        let markdown = tokio::fs::read_to_string(&item.path)
            .await
            .map_err(NodeError::Read)?;
        let pipeline = ImagePipeline {
            client: self.client,
            store: &self.store,
            project: &self.slug,
            base_dir: &self.options.cwd,
            dry_run: self.options.dry_run,
            reporter: self.reporter,
        };
        let images = pipeline
            .process(&item.key, &markdown, &item.path, state)
            .await?;
        report.images_uploaded += images.uploaded();
        report.images_cached += images.cached();
        report.images_failed += images.failed();
        report.image_details.extend(images.outcomes.iter().cloned());
        if !images.outcomes.is_empty() {
            self.reporter.set_upload_progress(
                report.images_uploaded + report.images_cached,
                report.image_details.len(),
            );
        }

        self.reporter.update_entry(&item.key, EntryStatus::Converting);
        let conversion = convert::convert(
            &images.markdown,
            &ConvertOptions {
                image_uploads: images.uploads,
                chunk: self.options.chunk,
            },
        );
        let mut warnings = images.warnings;
        warnings.extend(conversion.warnings);
        for warning in &warnings {
            self.reporter
                .log_warn(&format!("{}: {}", item.key, warning.message));
        }
        let chunks = conversion.chunks;

        let existing = state
            .doc_page(&self.slug, &item.key)
            .map(|page| page.page_id().to_owned());

        if self.options.dry_run {
            let action = if existing.is_some() {
                Action::Update
            } else {
                Action::Create
            };
            report.previews.push(Preview {
                file: item.key.clone(),
                action,
                blocks: chunks.iter().map(Vec::len).sum(),
                chunks: chunks.len(),
                warnings: warnings.len(),
            });
            let page_id = existing.unwrap_or_else(|| simulated_page_id(&item.key));
            if item.is_root {
                state.project_mut(&self.slug).root_page_id = Some(page_id.clone());
            }
            return Ok(match action {
                Action::Create => NodeOutcome::Created { page_id },
                Action::Update => NodeOutcome::Updated { page_id },
            });
        }

        if let Err(error) = warning::append_log(&self.log_path, &item.key, &warnings).await {
            warn!(%error, path = %self.log_path.display(), "failed to append warnings log");
        }

        self.reporter.update_entry(&item.key, EntryStatus::Writing);
        let mut updated = None;
        if let Some(page_id) = existing {
            if self.is_live(&page_id).await? {
                match page::update_page(self.client, &page_id, &item.title, &chunks).await {
                    Ok(page_id) => updated = Some(page_id),
                    Err(error)
                        if error.is_archived() || matches!(error, page::Error::PageNotFound(_)) =>
                    {
                        info!(%error, file = %item.key, "page went stale during update, recreating");
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            if updated.is_none() {
                state.remove_doc_page(&self.slug, &item.key);
            }
        }
        let (page_id, outcome) = match updated {
            Some(page_id) => (page_id.clone(), NodeOutcome::Updated { page_id }),
            None => {
                let page_id =
                    page::create_page(self.client, &parent_id, &item.title, &chunks).await?;
                (page_id.clone(), NodeOutcome::Created { page_id })
            }
        };

        state.set_doc_page(&self.slug, &item.key, &page_id, &check.hash);
        if item.is_root {
            state.project_mut(&self.slug).root_page_id = Some(page_id);
        }
        self.store.save(state).await?;
        Ok(outcome)
    }
}

/// Sync every document of the project found under `options.cwd`.
///
/// Input problems (no root document, unreadable state, no parent page) fail
/// the call. Per-document failures end up in the report.
pub async fn sync_project<C: Client>(
    client: &C,
    options: &SyncOptions,
    reporter: &dyn ProgressReporter,
) -> Result<SyncReport, Error> {
    let location = resolve_project(&options.cwd, options.project.as_deref()).await;
    info!(
        project = %location.slug,
        dir = %location.planning_dir.display(),
        dry_run = options.dry_run,
        "syncing project"
    );

    reporter.set_phase(BatchPhase::LoadingState);
    let store = StateStore::for_cwd(&options.cwd).read_only(options.dry_run);
    let mut state = store.load().await?;

    let workspace_page_id = options
        .parent_page_id
        .clone()
        .or_else(|| state.workspace_page_id.clone())
        .ok_or_else(|| {
            ErrorContext::new(&options.cwd)
                .with_project(&location.slug)
                .error(ErrorDetail::MissingParentPage)
        })?;
    state.workspace_page_id = Some(workspace_page_id.clone());

    reporter.set_phase(BatchPhase::BuildingHierarchy);
    let hierarchy = hierarchy::build_hierarchy(&location.planning_dir)?;
    let items = hierarchy::processing_order(&hierarchy, &options.cwd);
    reporter.register_entries(items.iter().map(|item| item.key.clone()).collect());

    let syncer = Syncer {
        client,
        store,
        log_path: options.cwd.join(PLANNING_DIR).join(LOG_FILE),
        slug: location.slug,
        workspace_page_id,
        options,
        reporter,
    };

    reporter.set_phase(BatchPhase::ProcessingDocuments);
    let mut report = SyncReport {
        total: items.len(),
        ..Default::default()
    };
    for item in &items {
        let result = match item.kind {
            NodeKind::Folder => syncer.sync_folder(item, &mut state).await,
            NodeKind::File => syncer.sync_file(item, &mut state, &mut report).await,
        };
        match result {
            Ok(NodeOutcome::Created { page_id }) => {
                info!(file = %item.key, %page_id, "created");
                report.created += 1;
                reporter.update_entry(&item.key, EntryStatus::Done);
            }
            Ok(NodeOutcome::Updated { page_id }) => {
                info!(file = %item.key, %page_id, "updated");
                report.updated += 1;
                reporter.update_entry(&item.key, EntryStatus::Done);
            }
            Ok(NodeOutcome::Skipped) => {
                debug!(file = %item.key, "unchanged");
                report.skipped += 1;
                reporter.update_entry(&item.key, EntryStatus::Skipped);
            }
            Err(error) => {
                error!(%error, file = %item.key, "sync failed");
                report.errors += 1;
                report.error_details.push(NodeFailure {
                    file: item.key.clone(),
                    error: error.to_string(),
                });
                reporter.update_entry(&item.key, EntryStatus::Failed(error.to_string()));
            }
        }
    }

    reporter.set_phase(BatchPhase::Completed);
    Ok(report)
}
