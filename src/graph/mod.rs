//! Node graph API and implementations.
//!
//! One interface, two stores: `MemoryGraph` (map-backed, lazy resolver)
//! and `IndexedGraph` (SQLite-backed, eager scan, materialized
//! virtuals). The hot-swap wrapper and the writable graph compose the
//! indexed store.

pub mod hotswap;
pub mod indexed;
pub mod memory;
pub mod writable;

pub use hotswap::{GenerationWatcher, HotSwapGraph};
pub use indexed::IndexedGraph;
pub use memory::MemoryGraph;
pub use writable::WritableGraph;

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ProjectionError, Result};

/// The id of the (virtual) filesystem root. Root-level nodes carry it as
/// their `parent_id`.
pub const ROOT_ID: &str = "";

/// Directory or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

impl NodeKind {
    pub fn as_i64(self) -> i64 {
        match self {
            NodeKind::Directory => 0,
            NodeKind::File => 1,
        }
    }

    pub fn from_i64(v: i64) -> Result<Self> {
        match v {
            0 => Ok(NodeKind::Directory),
            1 => Ok(NodeKind::File),
            other => Err(ProjectionError::Corruption(format!(
                "unknown node kind: {other}"
            ))),
        }
    }
}

/// Source byte range a node was materialized from. Anchor for write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file_path: PathBuf,
    pub start_byte: u64,
    pub end_byte: u64,
}

/// A directory or file entry in the mounted view.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Stable path-like id, `/`-separated, equal to
    /// `parent_id + "/" + name` (root-level nodes: just `name`).
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Byte length of materialized content (files only).
    pub size: u64,
    /// Unix seconds.
    pub mtime: u64,
    /// Identity of the source record, for lazy resolution.
    pub record_id: Option<String>,
    /// Materialized content (files); link files hold the target node id.
    pub content: Option<Vec<u8>>,
    pub origin: Option<Origin>,
    /// Last rejected edit buffer.
    pub draft: Option<Vec<u8>>,
}

impl GraphNode {
    pub fn directory(id: impl Into<String>, mtime: u64) -> Self {
        let id = id.into();
        let (parent_id, name) = split_id(&id);
        Self {
            id,
            parent_id,
            name,
            kind: NodeKind::Directory,
            size: 0,
            mtime,
            record_id: None,
            content: None,
            origin: None,
            draft: None,
        }
    }

    pub fn file(id: impl Into<String>, content: Vec<u8>, mtime: u64) -> Self {
        let id = id.into();
        let (parent_id, name) = split_id(&id);
        Self {
            id,
            parent_id,
            name,
            kind: NodeKind::Directory,
            size: content.len() as u64,
            mtime,
            record_id: None,
            content: Some(content),
            origin: None,
            draft: None,
        }
        .with_kind(NodeKind::File)
    }

    fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// The synthesized root directory.
    pub fn root() -> Self {
        GraphNode::directory(ROOT_ID, now_unix())
    }
}

/// Split an id into `(parent_id, name)`.
pub fn split_id(id: &str) -> (String, String) {
    match id.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (ROOT_ID.to_string(), id.to_string()),
    }
}

/// Join a parent id and a child name.
pub fn child_id(parent_id: &str, name: &str) -> String {
    if parent_id.is_empty() {
        name.to_string()
    } else {
        format!("{parent_id}/{name}")
    }
}

/// Current time as unix seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Read interface shared by both store implementations (and their
/// wrappers). `Send + Sync` so the filesystem adapter, the flusher, and
/// the watcher can share one store.
pub trait NodeStore: Send + Sync {
    fn get_node(&self, id: &str) -> Result<GraphNode>;

    /// Children of a directory, ordered by name. `NotADirectory` when
    /// called on a file.
    fn list_children(&self, id: &str) -> Result<Vec<GraphNode>>;

    /// Read file content into `buf` at `offset`; returns bytes read.
    /// `IsADirectory` when called on a directory.
    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Node ids whose content references `token`.
    fn get_callers(&self, token: &str) -> Result<Vec<String>>;

    /// Ad-hoc ref lookup backing the `/.query/` virtual directory.
    fn query_refs(&self, token: &str) -> Result<Vec<String>>;

    /// Drop cached size/content for a node.
    fn invalidate(&self, id: &str);
}

/// Write interface the ingestion engine materializes into.
pub trait NodeSink {
    /// Insert or replace a node (sibling name collisions: last wins).
    fn insert_node(&mut self, node: GraphNode) -> Result<()>;

    fn insert_ref(&mut self, token: &str, node_id: &str) -> Result<()>;

    fn insert_def(&mut self, token: &str, dir_id: &str) -> Result<()>;
}
