//! Hot-swap wrapper and generation watcher.
//!
//! `HotSwapGraph` holds the current graph behind a reader/writer lock;
//! reads clone the inner `Arc` under the read lock, so an in-flight read
//! keeps its snapshot alive across a concurrent swap. The watcher polls
//! the control block generation and, on change, extracts the arena's
//! active buffer, opens it, and swaps it in — failures are retried on
//! the next tick.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::arena;
use crate::control::ControlBlock;
use crate::error::Result;
use crate::graph::{GraphNode, IndexedGraph, NodeStore};

/// Default generation poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct SwapState {
    graph: Arc<IndexedGraph>,
    /// Extracted temp DB backing `graph`; removed when replaced.
    temp_path: Option<PathBuf>,
}

/// Swappable graph handle shared by the filesystem adapter and the
/// watcher thread.
pub struct HotSwapGraph {
    state: RwLock<SwapState>,
}

impl HotSwapGraph {
    pub fn new(graph: Arc<IndexedGraph>, temp_path: Option<PathBuf>) -> Self {
        Self {
            state: RwLock::new(SwapState { graph, temp_path }),
        }
    }

    /// Atomically replace the graph. The previous extracted image is
    /// deleted once the pointer is out.
    pub fn swap(&self, graph: Arc<IndexedGraph>, temp_path: Option<PathBuf>) {
        let old = {
            let mut state = self.state.write().expect("swap lock poisoned");
            std::mem::replace(&mut *state, SwapState { graph, temp_path })
        };
        if let Some(path) = old.temp_path {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Snapshot of the current graph.
    pub fn current(&self) -> Arc<IndexedGraph> {
        self.state
            .read()
            .expect("swap lock poisoned")
            .graph
            .clone()
    }
}

impl Drop for HotSwapGraph {
    fn drop(&mut self) {
        if let Ok(state) = self.state.read() {
            if let Some(path) = &state.temp_path {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

impl NodeStore for HotSwapGraph {
    fn get_node(&self, id: &str) -> Result<GraphNode> {
        self.current().get_node(id)
    }

    fn list_children(&self, id: &str) -> Result<Vec<GraphNode>> {
        self.current().list_children(id)
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.current().read_content(id, buf, offset)
    }

    fn get_callers(&self, token: &str) -> Result<Vec<String>> {
        self.current().get_callers(token)
    }

    fn query_refs(&self, token: &str) -> Result<Vec<String>> {
        self.current().query_refs(token)
    }

    fn invalidate(&self, id: &str) {
        self.current().invalidate(id)
    }
}

/// Background thread polling the control block for generation bumps.
pub struct GenerationWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GenerationWatcher {
    /// Spawn the watcher. `initial_generation` is the generation whose
    /// image the target currently serves.
    pub fn spawn(
        control_path: PathBuf,
        target: Arc<HotSwapGraph>,
        interval: Duration,
        initial_generation: u64,
    ) -> Result<Self> {
        let control = ControlBlock::open_or_create(&control_path)?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("leyline-watcher".into())
            .spawn(move || {
                let mut last = initial_generation;
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    let generation = control.generation();
                    if generation == last {
                        continue;
                    }
                    match refresh(&control) {
                        Ok((graph, temp_path)) => {
                            target.swap(graph, Some(temp_path));
                            info!(generation, "hot-swapped graph");
                            last = generation;
                        }
                        Err(e) => {
                            // Leave `last` unchanged: retry next tick.
                            warn!(error = %e, generation, "hot swap failed, will retry");
                        }
                    }
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

fn refresh(control: &ControlBlock) -> Result<(Arc<IndexedGraph>, PathBuf)> {
    let arena_path = control.arena_path()?;
    let temp_path = arena::extract_active_db(&arena_path)?;
    match IndexedGraph::open(&temp_path) {
        Ok(graph) => Ok((Arc::new(graph), temp_path)),
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

impl Drop for GenerationWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
