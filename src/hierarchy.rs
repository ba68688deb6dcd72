//! The page tree a planning directory maps to.
//!
//! `PROJECT.md` is the root page. The priority documents hang directly below
//! it, followed by one grouping page per subdirectory and then the remaining
//! documents. Folders under `phases/` become numbered phase pages.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::debug;

use crate::{Error, ErrorContext, ErrorDetail};

pub const ROOT_DOCUMENT: &str = "PROJECT.md";
pub const PRIORITY_DOCUMENTS: &[&str] = &["ROADMAP.md", "REQUIREMENTS.md", "STATE.md"];
pub const PHASES_DIR: &str = "phases";
const SKIPPED_DIRS: &[&str] = &["codebase"];
const DEFAULT_ROOT_TITLE: &str = "PROJECT";

static PHASE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)-(.+)$").unwrap());
static FIRST_H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());

/// `task_list` / `page-hierarchy` to `Task List` / `Page Hierarchy`.
pub fn title_case(slug: &str) -> String {
    slug.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `08-page-hierarchy` to `Phase 08 - Page Hierarchy`.
pub fn format_phase_title(folder: &str) -> String {
    match PHASE_NAME.captures(folder) {
        Some(caps) => format!("Phase {} - {}", &caps[1], title_case(&caps[2])),
        None => title_case(folder),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub path: PathBuf,
    pub title: String,
    pub children: Vec<Node>,
}

impl Node {
    fn file(path: PathBuf) -> Self {
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            kind: NodeKind::File,
            path,
            title,
            children: Vec::new(),
        }
    }

    fn folder(path: PathBuf, title: String, children: Vec<Node>) -> Self {
        Self {
            kind: NodeKind::Folder,
            path,
            title,
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    pub planning_dir: PathBuf,
    pub root: Node,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "md")
}

/// Direct entries of `dir`, sorted by name.
fn list_dir(dir: &Path) -> Result<Vec<walkdir::DirEntry>, Error> {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ErrorContext::new(dir).error(ErrorDetail::ReadDirectory(e)))
}

fn entry_name(entry: &walkdir::DirEntry) -> String {
    entry.file_name().to_string_lossy().into_owned()
}

/// Build the tree for `planning_dir`. Fails when the root document is absent.
pub fn build_hierarchy(planning_dir: &Path) -> Result<Hierarchy, Error> {
    let root_path = planning_dir.join(ROOT_DOCUMENT);
    let context = ErrorContext::new(&root_path);
    if !root_path.is_file() {
        return Err(context.error(ErrorDetail::RootDocumentMissing));
    }
    let content = std::fs::read_to_string(&root_path)
        .map_err(|e| context.error(ErrorDetail::ReadDocument(e)))?;
    let title = FIRST_H1
        .captures(&content)
        .map(|caps| caps[1].trim().to_owned())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_ROOT_TITLE.to_owned());

    let mut children: Vec<Node> = PRIORITY_DOCUMENTS
        .iter()
        .map(|name| planning_dir.join(name))
        .filter(|path| path.is_file())
        .map(Node::file)
        .collect();
    let mut excluded = vec![ROOT_DOCUMENT];
    excluded.extend_from_slice(PRIORITY_DOCUMENTS);
    children.extend(scan_directory(planning_dir, &excluded)?);

    debug!(root = %root_path.display(), %title, children = children.len(), "built hierarchy");
    Ok(Hierarchy {
        planning_dir: planning_dir.to_owned(),
        root: Node {
            kind: NodeKind::File,
            path: root_path,
            title,
            children,
        },
    })
}

/// Subdirectories first, then the documents of `dir` not in `excluded`.
fn scan_directory(dir: &Path, excluded: &[&str]) -> Result<Vec<Node>, Error> {
    let entries = list_dir(dir)?;
    let mut nodes = Vec::new();

    for entry in entries.iter().filter(|entry| entry.file_type().is_dir()) {
        let name = entry_name(entry);
        if is_hidden(&name) || SKIPPED_DIRS.contains(&name.as_str()) {
            continue;
        }
        if name == PHASES_DIR {
            nodes.extend(scan_phases(entry.path())?);
            continue;
        }
        let children = scan_directory(entry.path(), &[])?;
        if !children.is_empty() {
            nodes.push(Node::folder(
                entry.path().to_owned(),
                title_case(&name),
                children,
            ));
        }
    }

    nodes.extend(
        entries
            .iter()
            .filter(|entry| entry.file_type().is_file() && is_markdown(entry.path()))
            .filter(|entry| !excluded.contains(&entry_name(entry).as_str()))
            .map(|entry| Node::file(entry.path().to_owned())),
    );
    Ok(nodes)
}

/// One grouping node per phase folder holding that folder's documents.
fn scan_phases(dir: &Path) -> Result<Vec<Node>, Error> {
    let mut phases = Vec::new();
    for entry in list_dir(dir)? {
        let name = entry_name(&entry);
        if !entry.file_type().is_dir() || is_hidden(&name) {
            continue;
        }
        let documents = list_dir(entry.path())?
            .into_iter()
            .filter(|doc| doc.file_type().is_file() && is_markdown(doc.path()))
            .map(|doc| Node::file(doc.into_path()))
            .collect();
        phases.push(Node::folder(
            entry.path().to_owned(),
            format_phase_title(&name),
            documents,
        ));
    }
    Ok(phases)
}

/// Where a node's page is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentKey {
    /// The configured workspace page.
    Workspace,
    /// The project's root page.
    Root,
    /// A grouping page, by folder key.
    Folder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub kind: NodeKind,
    pub path: PathBuf,
    pub title: String,
    /// State key: documents relative to the working directory, folders
    /// relative to the planning directory.
    pub key: String,
    pub parent: ParentKey,
    pub is_root: bool,
}

fn relative_key(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Breadth-first order: every node comes after its parent.
pub fn processing_order(hierarchy: &Hierarchy, cwd: &Path) -> Vec<SyncItem> {
    let root = &hierarchy.root;
    let mut items = vec![SyncItem {
        kind: NodeKind::File,
        path: root.path.clone(),
        title: root.title.clone(),
        key: relative_key(&root.path, cwd),
        parent: ParentKey::Workspace,
        is_root: true,
    }];

    let mut queue: VecDeque<(&Node, ParentKey)> = root
        .children
        .iter()
        .map(|child| (child, ParentKey::Root))
        .collect();
    while let Some((node, parent)) = queue.pop_front() {
        let key = match node.kind {
            NodeKind::File => relative_key(&node.path, cwd),
            NodeKind::Folder => relative_key(&node.path, &hierarchy.planning_dir),
        };
        if node.kind == NodeKind::Folder {
            queue.extend(
                node.children
                    .iter()
                    .map(|child| (child, ParentKey::Folder(key.clone()))),
            );
        }
        items.push(SyncItem {
            kind: node.kind,
            path: node.path.clone(),
            title: node.title.clone(),
            key,
            parent,
            is_root: false,
        });
    }
    items
}
