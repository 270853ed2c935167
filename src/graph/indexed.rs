//! SQLite-backed node store.
//!
//! The relational image is the unit of distribution: ingestion writes
//! it, the arena carries two copies of it, hot-swap readers open
//! extracted copies of it. Journal mode is DELETE (not WAL) so the main
//! DB file is always self-contained when the arena flusher copies it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{ProjectionError, Result};
use crate::graph::{
    child_id, now_unix, split_id, GraphNode, NodeKind, NodeSink, NodeStore, Origin, ROOT_ID,
};

const VERSION: i64 = 1;

const SCHEMA: &str = r#"
        CREATE TABLE metadata (
            version INTEGER NOT NULL
        ) STRICT;
        CREATE TABLE nodes (
            id           TEXT PRIMARY KEY,
            parent_id    TEXT NOT NULL,
            name         TEXT NOT NULL,
            kind         INTEGER NOT NULL,
            size         INTEGER NOT NULL,
            mtime        INTEGER NOT NULL,
            record_id    TEXT,
            content      BLOB,
            origin_file  TEXT,
            origin_start INTEGER,
            origin_end   INTEGER,
            draft        BLOB
        ) STRICT;
        CREATE TABLE node_refs (
            token   TEXT NOT NULL,
            node_id TEXT NOT NULL
        ) STRICT;
        CREATE TABLE node_defs (
            token  TEXT NOT NULL,
            dir_id TEXT NOT NULL
        ) STRICT;
    "#;

const INDEXES: &str = r#"
        CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id, name);
        CREATE INDEX IF NOT EXISTS idx_nodes_origin ON nodes(origin_file);
        CREATE INDEX IF NOT EXISTS idx_refs_token ON node_refs(token);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_defs_token ON node_defs(token);
    "#;

const PRAGMAS: &str = r#"
        PRAGMA journal_mode = DELETE;
        PRAGMA foreign_keys = false;
        PRAGMA secure_delete = false;
    "#;

const NODE_COLUMNS: &str =
    "id, parent_id, name, kind, size, mtime, record_id, content, origin_file, origin_start, origin_end, draft";

/// SQLite-backed store.
pub struct IndexedGraph {
    conn: Mutex<Connection>,
    path: PathBuf,
    /// Eager-scan cache: id → node. Filled by `eager_scan`, consulted by
    /// `get_node`, dropped entry-wise on invalidation and writes.
    cache: RwLock<HashMap<String, GraphNode>>,
}

impl IndexedGraph {
    /// Create a fresh database file (truncating any existing one).
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute("INSERT INTO metadata (version) VALUES (?1)", [VERSION])?;
        conn.execute_batch(INDEXES)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Open (attach to) an existing database image. The version row is
    /// validated; an unknown version refuses to open.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        let version: Option<i64> = conn
            .query_row("SELECT version FROM metadata", [], |row| row.get(0))
            .optional()
            .map_err(|_| {
                ProjectionError::Corruption(format!("not a graph image: {}", path.display()))
            })?;
        match version {
            Some(VERSION) => {}
            Some(other) => {
                return Err(ProjectionError::Corruption(format!(
                    "unsupported graph image version: {other}"
                )))
            }
            None => {
                return Err(ProjectionError::Corruption(format!(
                    "graph image has no version row: {}",
                    path.display()
                )))
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock poisoned")
    }

    /// Warm the whole node table into the in-process cache. Returns the
    /// number of rows scanned.
    pub fn eager_scan(&self) -> Result<usize> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes"))?;
        let rows = stmt.query_map([], row_to_node)?;
        let mut cache = self.cache.write().expect("cache lock poisoned");
        cache.clear();
        let mut count = 0;
        for node in rows {
            let node = node?;
            cache.insert(node.id.clone(), node);
            count += 1;
        }
        debug!(count, "eager scan complete");
        Ok(count)
    }

    /// Insert or replace a node row. Exposed with `&self` so write-back
    /// and virtual materialization can upsert through the shared handle.
    pub fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        let (origin_file, origin_start, origin_end) = match &node.origin {
            Some(origin) => (
                Some(origin.file_path.display().to_string()),
                Some(origin.start_byte as i64),
                Some(origin.end_byte as i64),
            ),
            None => (None, None, None),
        };
        self.lock().execute(
            &format!(
                "INSERT OR REPLACE INTO nodes ({NODE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                node.id,
                node.parent_id,
                node.name,
                node.kind.as_i64(),
                node.size as i64,
                node.mtime as i64,
                node.record_id,
                node.content,
                origin_file,
                origin_start,
                origin_end,
                node.draft,
            ],
        )?;
        self.cache
            .write()
            .expect("cache lock poisoned")
            .remove(&node.id);
        Ok(())
    }

    /// Replace a file node's content (write-back step 4).
    pub fn update_content(&self, id: &str, content: &[u8], mtime: u64) -> Result<()> {
        let changed = self.lock().execute(
            "UPDATE nodes SET content = ?1, size = ?2, mtime = ?3, draft = NULL WHERE id = ?4",
            params![content, content.len() as i64, mtime as i64, id],
        )?;
        if changed == 0 {
            return Err(ProjectionError::NotFound(id.to_string()));
        }
        self.cache.write().expect("cache lock poisoned").remove(id);
        Ok(())
    }

    /// Rewrite a node's origin range.
    pub fn set_origin(&self, id: &str, start_byte: u64, end_byte: u64) -> Result<()> {
        let changed = self.lock().execute(
            "UPDATE nodes SET origin_start = ?1, origin_end = ?2 WHERE id = ?3",
            params![start_byte as i64, end_byte as i64, id],
        )?;
        if changed == 0 {
            return Err(ProjectionError::NotFound(id.to_string()));
        }
        self.cache.write().expect("cache lock poisoned").remove(id);
        Ok(())
    }

    /// Shift the origins of every node in `file` whose range starts at
    /// or after `min_start` by `delta` bytes, excluding `except_id`.
    /// Returns the number of shifted rows.
    pub fn shift_origins(
        &self,
        file: &str,
        min_start: u64,
        delta: i64,
        except_id: &str,
    ) -> Result<usize> {
        let changed = self.lock().execute(
            "UPDATE nodes SET origin_start = origin_start + ?1, origin_end = origin_end + ?1 \
             WHERE origin_file = ?2 AND origin_start >= ?3 AND id != ?4",
            params![delta, file, min_start as i64, except_id],
        )?;
        self.cache.write().expect("cache lock poisoned").clear();
        Ok(changed)
    }

    /// Store (or clear) a rejected edit buffer.
    pub fn set_draft(&self, id: &str, draft: Option<&[u8]>) -> Result<()> {
        let changed = self.lock().execute(
            "UPDATE nodes SET draft = ?1 WHERE id = ?2",
            params![draft, id],
        )?;
        if changed == 0 {
            return Err(ProjectionError::NotFound(id.to_string()));
        }
        self.cache.write().expect("cache lock poisoned").remove(id);
        Ok(())
    }

    /// All `(token, dir_id)` definition rows.
    pub fn all_defs(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT token, dir_id FROM node_defs ORDER BY token")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Materialize the virtual entries that live inside the image:
    /// `callers/` and `callees/` link directories, `_schema.json`, and
    /// the agent-mode `PROMPT.txt`.
    pub fn materialize_virtuals(
        &self,
        topology_json: Option<&str>,
        agent_prompt: Option<&str>,
    ) -> Result<()> {
        let now = now_unix();
        if let Some(json) = topology_json {
            self.upsert_node(&GraphNode::file(
                "_schema.json",
                json.as_bytes().to_vec(),
                now,
            ))?;
        }
        if let Some(prompt) = agent_prompt {
            self.upsert_node(&GraphNode::file(
                "PROMPT.txt",
                prompt.as_bytes().to_vec(),
                now,
            ))?;
        }

        for (token, dir_id) in self.all_defs()? {
            let callers: Vec<String> = self
                .query_refs(&token)?
                .into_iter()
                // A definition's own source references its name; that is
                // not a caller.
                .filter(|node_id| !node_id.starts_with(&format!("{dir_id}/")))
                .collect();
            if callers.is_empty() {
                continue;
            }

            // dir/callers/<Caller> → caller file node id.
            let callers_dir = child_id(&dir_id, "callers");
            self.upsert_node(&GraphNode::directory(callers_dir.clone(), now))?;
            let target_id = self.link_target(&dir_id);
            for caller in &callers {
                let label = caller_label(caller);
                self.upsert_node(&GraphNode::file(
                    child_id(&callers_dir, &label),
                    caller.as_bytes().to_vec(),
                    now,
                ))?;

                // Symmetric: the caller's directory gets a callees/ link
                // back to the definition.
                let (caller_dir, _) = split_id(caller);
                if caller_dir.is_empty() {
                    continue;
                }
                let callees_dir = child_id(&caller_dir, "callees");
                self.upsert_node(&GraphNode::directory(callees_dir.clone(), now))?;
                self.upsert_node(&GraphNode::file(
                    child_id(&callees_dir, &token),
                    target_id.as_bytes().to_vec(),
                    now,
                ))?;
            }
        }
        Ok(())
    }

    /// Link target for a definition directory: its `source` child when
    /// present, else the directory itself.
    fn link_target(&self, dir_id: &str) -> String {
        let source = child_id(dir_id, "source");
        if self.get_node(&source).is_ok() {
            source
        } else {
            dir_id.to_string()
        }
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
    let kind_raw: i64 = row.get(3)?;
    let origin_file: Option<String> = row.get(8)?;
    let origin = origin_file.map(|file| Origin {
        file_path: PathBuf::from(file),
        start_byte: row.get::<_, i64>(9).unwrap_or(0) as u64,
        end_byte: row.get::<_, i64>(10).unwrap_or(0) as u64,
    });
    Ok(GraphNode {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        name: row.get(2)?,
        kind: NodeKind::from_i64(kind_raw).unwrap_or(NodeKind::File),
        size: row.get::<_, i64>(4)? as u64,
        mtime: row.get::<_, i64>(5)? as u64,
        record_id: row.get(6)?,
        content: row.get(7)?,
        origin,
        draft: row.get(11)?,
    })
}

/// A caller link is named after the caller's directory (the function it
/// lives in), falling back to a flattened id.
fn caller_label(caller_id: &str) -> String {
    let (parent, name) = split_id(caller_id);
    if parent.is_empty() {
        name
    } else {
        split_id(&parent).1
    }
}

impl NodeSink for IndexedGraph {
    fn insert_node(&mut self, node: GraphNode) -> Result<()> {
        self.upsert_node(&node)
    }

    fn insert_ref(&mut self, token: &str, node_id: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO node_refs (token, node_id) VALUES (?1, ?2)",
            params![token, node_id],
        )?;
        Ok(())
    }

    fn insert_def(&mut self, token: &str, dir_id: &str) -> Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO node_defs (token, dir_id) VALUES (?1, ?2)",
            params![token, dir_id],
        )?;
        Ok(())
    }
}

impl NodeStore for IndexedGraph {
    fn get_node(&self, id: &str) -> Result<GraphNode> {
        if id == ROOT_ID {
            return Ok(GraphNode::root());
        }
        if let Some(node) = self
            .cache
            .read()
            .expect("cache lock poisoned")
            .get(id)
            .cloned()
        {
            return Ok(node);
        }
        let conn = self.lock();
        let node = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                [id],
                row_to_node,
            )
            .optional()?;
        node.ok_or_else(|| ProjectionError::NotFound(id.to_string()))
    }

    fn list_children(&self, id: &str) -> Result<Vec<GraphNode>> {
        let node = self.get_node(id)?;
        if !node.is_dir() {
            return Err(ProjectionError::NotADirectory(id.to_string()));
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map([id], row_to_node)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let node = self.get_node(id)?;
        if node.is_dir() {
            return Err(ProjectionError::IsADirectory(id.to_string()));
        }
        let content = node.content.unwrap_or_default();
        let offset = offset.min(content.len() as u64) as usize;
        let n = buf.len().min(content.len() - offset);
        buf[..n].copy_from_slice(&content[offset..offset + n]);
        Ok(n)
    }

    fn get_callers(&self, token: &str) -> Result<Vec<String>> {
        self.query_refs(token)
    }

    fn query_refs(&self, token: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT node_id FROM node_refs WHERE token = ?1 ORDER BY node_id")?;
        let rows = stmt.query_map([token], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn invalidate(&self, id: &str) {
        self.cache.write().expect("cache lock poisoned").remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_graph(dir: &TempDir) -> IndexedGraph {
        let mut graph = IndexedGraph::create(&dir.path().join("index.db")).unwrap();
        graph.insert_node(GraphNode::directory("functions", 1)).unwrap();
        graph
            .insert_node(GraphNode::directory("functions/Hello", 1))
            .unwrap();
        graph
            .insert_node(
                GraphNode::file("functions/Hello/source", b"func Hello() {}".to_vec(), 1)
                    .with_origin(Origin {
                        file_path: PathBuf::from("main.go"),
                        start_byte: 20,
                        end_byte: 35,
                    }),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_create_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        {
            sample_graph(&dir);
        }
        let graph = IndexedGraph::open(&path).unwrap();
        let node = graph.get_node("functions/Hello/source").unwrap();
        assert_eq!(node.size, 15);
        let origin = node.origin.unwrap();
        assert_eq!(origin.start_byte, 20);
        assert_eq!(origin.end_byte, 35);
    }

    #[test]
    fn test_open_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, b"not a database").unwrap();
        assert!(IndexedGraph::open(&path).is_err());
    }

    #[test]
    fn test_list_children_sorted() {
        let dir = TempDir::new().unwrap();
        let mut graph = sample_graph(&dir);
        graph.insert_node(GraphNode::directory("aaa", 1)).unwrap();
        let roots = graph.list_children(ROOT_ID).unwrap();
        let names: Vec<&str> = roots.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["aaa", "functions"]);
    }

    #[test]
    fn test_error_kinds() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph(&dir);
        assert!(matches!(
            graph.get_node("nope"),
            Err(ProjectionError::NotFound(_))
        ));
        assert!(matches!(
            graph.list_children("functions/Hello/source"),
            Err(ProjectionError::NotADirectory(_))
        ));
        let mut buf = [0u8; 1];
        assert!(matches!(
            graph.read_content("functions", &mut buf, 0),
            Err(ProjectionError::IsADirectory(_))
        ));
    }

    #[test]
    fn test_eager_scan_warms_cache() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph(&dir);
        let scanned = graph.eager_scan().unwrap();
        assert_eq!(scanned, 3);
        assert!(graph
            .cache
            .read()
            .unwrap()
            .contains_key("functions/Hello/source"));
        // Cached reads still resolve.
        assert_eq!(graph.get_node("functions/Hello").unwrap().name, "Hello");
    }

    #[test]
    fn test_update_content_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph(&dir);
        graph.eager_scan().unwrap();
        graph
            .update_content("functions/Hello/source", b"func Hello() { return }", 99)
            .unwrap();
        let node = graph.get_node("functions/Hello/source").unwrap();
        assert_eq!(node.size, 23);
        assert_eq!(node.mtime, 99);
    }

    #[test]
    fn test_shift_origins() {
        let dir = TempDir::new().unwrap();
        let mut graph = sample_graph(&dir);
        graph
            .insert_node(
                GraphNode::file("functions/World/source", b"func World() {}".to_vec(), 1)
                    .with_origin(Origin {
                        file_path: PathBuf::from("main.go"),
                        start_byte: 40,
                        end_byte: 55,
                    }),
            )
            .unwrap();
        graph.insert_node(GraphNode::directory("functions/World", 1)).unwrap();

        let shifted = graph
            .shift_origins("main.go", 35, 8, "functions/Hello/source")
            .unwrap();
        assert_eq!(shifted, 1);

        let world = graph.get_node("functions/World/source").unwrap().origin.unwrap();
        assert_eq!((world.start_byte, world.end_byte), (48, 63));
        let hello = graph.get_node("functions/Hello/source").unwrap().origin.unwrap();
        assert_eq!((hello.start_byte, hello.end_byte), (20, 35));
    }

    #[test]
    fn test_refs_defs_queries() {
        let dir = TempDir::new().unwrap();
        let mut graph = sample_graph(&dir);
        graph
            .insert_ref("Hello", "functions/ProcessOrder/source")
            .unwrap();
        graph.insert_def("Hello", "functions/Hello").unwrap();
        assert_eq!(
            graph.query_refs("Hello").unwrap(),
            vec!["functions/ProcessOrder/source"]
        );
        // Re-defining a token replaces the previous row (at most one def).
        graph.insert_def("Hello", "types/Hello").unwrap();
        let defs = graph.all_defs().unwrap();
        assert_eq!(defs, vec![("Hello".to_string(), "types/Hello".to_string())]);
    }

    #[test]
    fn test_materialize_callers_and_callees() {
        let dir = TempDir::new().unwrap();
        let mut graph = sample_graph(&dir);
        // ProcessOrder calls Hello.
        graph.insert_node(GraphNode::directory("functions/ProcessOrder", 1)).unwrap();
        graph
            .insert_node(GraphNode::file(
                "functions/ProcessOrder/source",
                b"func ProcessOrder() { Hello() }".to_vec(),
                1,
            ))
            .unwrap();
        graph
            .insert_ref("Hello", "functions/ProcessOrder/source")
            .unwrap();
        // The definition's own source also references the token.
        graph
            .insert_ref("Hello", "functions/Hello/source")
            .unwrap();
        graph.insert_def("Hello", "functions/Hello").unwrap();

        graph.materialize_virtuals(Some("{}"), None).unwrap();

        let callers = graph.list_children("functions/Hello/callers").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].name, "ProcessOrder");
        let mut buf = [0u8; 64];
        let n = graph
            .read_content("functions/Hello/callers/ProcessOrder", &mut buf, 0)
            .unwrap();
        assert_eq!(&buf[..n], b"functions/ProcessOrder/source");

        let callees = graph.list_children("functions/ProcessOrder/callees").unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].name, "Hello");
        let n = graph
            .read_content("functions/ProcessOrder/callees/Hello", &mut buf, 0)
            .unwrap();
        assert_eq!(&buf[..n], b"functions/Hello/source");

        // _schema.json landed at the root.
        assert!(graph.get_node("_schema.json").is_ok());
    }

    #[test]
    fn test_drafts() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph(&dir);
        graph
            .set_draft("functions/Hello/source", Some(b"func Hello() {"))
            .unwrap();
        let node = graph.get_node("functions/Hello/source").unwrap();
        assert_eq!(node.draft.as_deref(), Some(b"func Hello() {".as_slice()));
        graph.set_draft("functions/Hello/source", None).unwrap();
        assert!(graph.get_node("functions/Hello/source").unwrap().draft.is_none());
    }
}
