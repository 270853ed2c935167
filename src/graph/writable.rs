//! Writable graph: the read-write master image paired with the arena
//! flusher.
//!
//! Graph mutations land in the master DB immediately; `flush()` only
//! marks the arena dirty, so bursts of writes ride one buffer copy per
//! flusher tick. Readers in other processes observe the batch at the
//! next generation bump.

use std::sync::Arc;

use crate::error::Result;
use crate::flusher::ArenaFlusher;
use crate::graph::{now_unix, GraphNode, IndexedGraph, NodeStore};

pub struct WritableGraph {
    graph: Arc<IndexedGraph>,
    flusher: ArenaFlusher,
}

impl WritableGraph {
    pub fn new(graph: Arc<IndexedGraph>, flusher: ArenaFlusher) -> Self {
        Self { graph, flusher }
    }

    /// The underlying store, for surgical updates (write-back).
    pub fn graph(&self) -> &IndexedGraph {
        &self.graph
    }

    /// Overwrite a file node's content in the master DB.
    pub fn update_record(&self, id: &str, bytes: &[u8]) -> Result<()> {
        self.graph.update_content(id, bytes, now_unix())
    }

    /// Mark the arena dirty; the flusher coalesces and publishes.
    pub fn flush(&self) {
        self.flusher.request_flush();
    }

    /// Synchronous flush (final flush on unmount).
    pub fn flush_now(&self) -> Result<u64> {
        self.flusher.flush_now()
    }
}

impl NodeStore for WritableGraph {
    fn get_node(&self, id: &str) -> Result<GraphNode> {
        self.graph.get_node(id)
    }

    fn list_children(&self, id: &str) -> Result<Vec<GraphNode>> {
        self.graph.list_children(id)
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.graph.read_content(id, buf, offset)
    }

    fn get_callers(&self, token: &str) -> Result<Vec<String>> {
        self.graph.get_callers(token)
    }

    fn query_refs(&self, token: &str) -> Result<Vec<String>> {
        self.graph.query_refs(token)
    }

    fn invalidate(&self, id: &str) {
        self.graph.invalidate(id)
    }
}
