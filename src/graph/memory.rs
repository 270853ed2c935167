//! In-memory node store.
//!
//! Map of id → node plus an ordered reverse index from parent to
//! children. Content for nodes with a `record_id` but no materialized
//! bytes is fetched through an optional resolver callback on demand.
//! Refs/defs can additionally be persisted to an embedded relational
//! file for ad-hoc queries across runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::Connection;

use crate::error::{ProjectionError, Result};
use crate::graph::{GraphNode, NodeSink, NodeStore, ROOT_ID};

/// Lazy content fetch: record id → content bytes.
pub type Resolver = Box<dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync>;

const EDGE_SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS node_refs (
            token   TEXT NOT NULL,
            node_id TEXT NOT NULL
        ) STRICT;
        CREATE TABLE IF NOT EXISTS node_defs (
            token  TEXT NOT NULL,
            dir_id TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_refs_token ON node_refs(token);
        CREATE INDEX IF NOT EXISTS idx_defs_token ON node_defs(token);
    "#;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, GraphNode>,
    /// Parent id → ordered child names.
    children: HashMap<String, Vec<String>>,
    refs: HashMap<String, Vec<String>>,
    defs: HashMap<String, String>,
}

/// Map-backed store.
pub struct MemoryGraph {
    inner: RwLock<Inner>,
    resolver: Option<Resolver>,
    edge_db: Option<Mutex<Connection>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            resolver: None,
            edge_db: None,
        }
    }

    /// Attach a lazy content resolver.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Persist refs/defs to an embedded relational file alongside the
    /// in-memory copies.
    pub fn with_edge_db(mut self, path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(EDGE_SCHEMA)?;
        self.edge_db = Some(Mutex::new(conn));
        Ok(self)
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().expect("graph lock poisoned").nodes.len()
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("graph lock poisoned")
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSink for MemoryGraph {
    fn insert_node(&mut self, node: GraphNode) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        let siblings = inner.children.entry(node.parent_id.clone()).or_default();
        if !siblings.contains(&node.name) {
            siblings.push(node.name.clone());
        }
        inner.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn insert_ref(&mut self, token: &str, node_id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        inner
            .refs
            .entry(token.to_string())
            .or_default()
            .push(node_id.to_string());
        if let Some(db) = &self.edge_db {
            db.lock().expect("edge db lock poisoned").execute(
                "INSERT INTO node_refs (token, node_id) VALUES (?1, ?2)",
                (token, node_id),
            )?;
        }
        Ok(())
    }

    fn insert_def(&mut self, token: &str, dir_id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        inner.defs.insert(token.to_string(), dir_id.to_string());
        if let Some(db) = &self.edge_db {
            db.lock().expect("edge db lock poisoned").execute(
                "INSERT INTO node_defs (token, dir_id) VALUES (?1, ?2)",
                (token, dir_id),
            )?;
        }
        Ok(())
    }
}

impl NodeStore for MemoryGraph {
    fn get_node(&self, id: &str) -> Result<GraphNode> {
        if id == ROOT_ID {
            return Ok(GraphNode::root());
        }
        self.read_inner()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| ProjectionError::NotFound(id.to_string()))
    }

    fn list_children(&self, id: &str) -> Result<Vec<GraphNode>> {
        let node = self.get_node(id)?;
        if !node.is_dir() {
            return Err(ProjectionError::NotADirectory(id.to_string()));
        }
        let inner = self.read_inner();
        let names = inner.children.get(id).cloned().unwrap_or_default();
        names
            .iter()
            .map(|name| {
                let child = crate::graph::child_id(id, name);
                inner
                    .nodes
                    .get(&child)
                    .cloned()
                    .ok_or_else(|| ProjectionError::NotFound(child))
            })
            .collect()
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let node = self.get_node(id)?;
        if node.is_dir() {
            return Err(ProjectionError::IsADirectory(id.to_string()));
        }
        let content = match (&node.content, &node.record_id, &self.resolver) {
            (Some(content), _, _) => content.clone(),
            (None, Some(record_id), Some(resolver)) => resolver(record_id)?,
            _ => Vec::new(),
        };
        let offset = offset.min(content.len() as u64) as usize;
        let n = buf.len().min(content.len() - offset);
        buf[..n].copy_from_slice(&content[offset..offset + n]);
        Ok(n)
    }

    fn get_callers(&self, token: &str) -> Result<Vec<String>> {
        Ok(self
            .read_inner()
            .refs
            .get(token)
            .cloned()
            .unwrap_or_default())
    }

    fn query_refs(&self, token: &str) -> Result<Vec<String>> {
        if let Some(db) = &self.edge_db {
            let db = db.lock().expect("edge db lock poisoned");
            let mut stmt =
                db.prepare("SELECT node_id FROM node_refs WHERE token = ?1 ORDER BY node_id")?;
            let rows = stmt.query_map([token], |row| row.get::<_, String>(0))?;
            return Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?);
        }
        self.get_callers(token)
    }

    fn invalidate(&self, id: &str) {
        let mut inner = self.inner.write().expect("graph lock poisoned");
        if let Some(node) = inner.nodes.get_mut(id) {
            if node.record_id.is_some() {
                node.content = None;
            }
        }
    }
}
