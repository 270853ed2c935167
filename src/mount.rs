//! Mount orchestration.
//!
//! The §-by-§ flow at mount time: resolve the data source, load or infer
//! a schema, open a graph (ingest to an index DB or attach to an
//! existing image), attach the filesystem adapter, start the hot-swap
//! watcher or the arena flusher, and block until an unmount signal.
//!
//! The CLI is an external collaborator; it composes `materialize` and
//! `mount` and nothing else.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fuser::MountOption;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;

use crate::arena::Arena;
use crate::control::ControlBlock;
use crate::error::{ProjectionError, Result};
use crate::flusher::{ArenaFlusher, DEFAULT_FLUSH_INTERVAL};
use crate::fs::{ProjectionFs, WriterHandles};
use crate::graph::hotswap::DEFAULT_POLL_INTERVAL;
use crate::graph::{
    GenerationWatcher, HotSwapGraph, IndexedGraph, NodeStore, WritableGraph,
};
use crate::infer::{infer_topology, InferOptions};
use crate::ingest::{detect_source, json, scan_tree_definitions, IngestStats, Ingestor, SourceKind};
use crate::lang::IdentifierExtractor;
use crate::topology::Topology;
use crate::writeback::WriteBack;

/// Navigation guide materialized as `/PROMPT.txt` in agent mode.
pub const AGENT_PROMPT: &str = "\
This mount projects a structured data source as a filesystem.

Navigation:
- Directories group records by their semantic structure; list them
  with ordinary tools (ls, find).
- Each record directory holds one file per projected field, plus
  raw.json with the full record.
- Definition directories may contain callers/ and callees/ — each
  entry is a file whose content is the node path of the linked
  definition; cat it and follow the path.
- /_schema.json is the projection schema.
- /.query/<identifier>/ lists every file referencing <identifier>.
";

/// Mount configuration.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Data source: JSON document, source tree, or DB image.
    pub source: PathBuf,
    /// Load this topology instead of inferring one.
    pub schema: Option<PathBuf>,
    /// Control block path; enables arena mode (hot-swap or writable).
    pub control: Option<PathBuf>,
    pub writable: bool,
    pub agent_mode: bool,
    pub infer: InferOptions,
    pub flush_interval: Duration,
    pub poll_interval: Duration,
}

impl MountOptions {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            schema: None,
            control: None,
            writable: false,
            agent_mode: false,
            infer: InferOptions::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Install the process-wide tracing subscriber. Called once by the CLI.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Where the inferred schema is persisted next to an index DB.
pub fn schema_sidecar_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.file_name().unwrap_or_default().to_os_string();
    name.push(".schema.json");
    db_path.with_file_name(name)
}

/// Load the schema from disk, or infer one from the source.
pub fn resolve_topology(
    source: &Path,
    schema: Option<&Path>,
    opts: &InferOptions,
) -> Result<Topology> {
    if let Some(path) = schema {
        return Topology::from_json(&std::fs::read_to_string(path)?);
    }
    let root_name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data")
        .to_string();
    let records = match detect_source(source) {
        SourceKind::JsonFile => json::load_records(source)?,
        SourceKind::SourceTree => scan_tree_definitions(source)?,
        SourceKind::DbImage => {
            return Err(ProjectionError::InvalidTopology(
                "db images carry their schema in /_schema.json".into(),
            ))
        }
        SourceKind::GitHistory => {
            return Err(ProjectionError::InvalidTopology(
                "git history records come from the external loader".into(),
            ))
        }
    };
    infer_topology(&records, &root_name, opts)
}

/// Materialize the index DB image for a source without mounting
/// (the CLI's `mount --out` path). The topology is embedded as
/// `_schema.json` and persisted as a sidecar for reuse.
pub fn materialize(
    source: &Path,
    schema: Option<&Path>,
    out: &Path,
    opts: &MountOptions,
) -> Result<IngestStats> {
    let topology = resolve_topology(source, schema, &opts.infer)?;
    let mut graph = IndexedGraph::create(out)?;
    let extractor = IdentifierExtractor;
    let stats = Ingestor::new(&topology, &extractor).ingest(source, &mut graph)?;

    let topology_json = topology.to_json()?;
    let prompt = opts.agent_mode.then_some(AGENT_PROMPT);
    graph.materialize_virtuals(Some(&topology_json), prompt)?;
    std::fs::write(schema_sidecar_path(out), &topology_json)?;
    info!(out = %out.display(), ?stats, "materialized index image");
    Ok(stats)
}

/// Long-lived singletons for an active mount. Dropping unmounts.
struct Mounted {
    store: Arc<dyn NodeStore>,
    writer: Option<Arc<WritableGraph>>,
    watcher: Option<GenerationWatcher>,
    /// Master DB extracted for this process (removed on unmount).
    temp_db: Option<PathBuf>,
}

fn open_projection(opts: &MountOptions) -> Result<Mounted> {
    match (&opts.control, opts.writable) {
        // Hot-swap read mode: extract the active image, watch for bumps.
        (Some(control_path), false) => {
            let control = ControlBlock::open_or_create(control_path)?;
            let generation = control.generation();
            let arena_path = control.arena_path()?;
            let temp = crate::arena::extract_active_db(&arena_path)?;
            let graph = IndexedGraph::open(&temp)?;
            graph.eager_scan()?;
            let swap = Arc::new(HotSwapGraph::new(Arc::new(graph), Some(temp)));
            let watcher = GenerationWatcher::spawn(
                control_path.clone(),
                Arc::clone(&swap),
                opts.poll_interval,
                generation,
            )?;
            Ok(Mounted {
                store: swap,
                writer: None,
                watcher: Some(watcher),
                temp_db: None,
            })
        }
        // Writable mode: this process is the generation source; the
        // watcher stays off.
        (Some(control_path), true) => {
            let control = ControlBlock::open_or_create(control_path)?;
            let arena_path = control.arena_path()?;
            let master = crate::arena::extract_active_db(&arena_path)?;
            let graph = Arc::new(IndexedGraph::open(&master)?);
            let arena = Arena::open(&arena_path)?;
            let flusher =
                ArenaFlusher::start(arena, master.clone(), Some(control), opts.flush_interval);
            let writable = Arc::new(WritableGraph::new(Arc::clone(&graph), flusher));
            Ok(Mounted {
                store: Arc::clone(&writable) as Arc<dyn NodeStore>,
                writer: Some(writable),
                watcher: None,
                temp_db: Some(master),
            })
        }
        (None, true) => Err(ProjectionError::Validation(
            "writable mode requires a control block (--control)".into(),
        )),
        // Plain mount: ingest (or attach) and serve read-only.
        (None, false) => {
            let graph = match detect_source(&opts.source) {
                SourceKind::DbImage => {
                    let graph = IndexedGraph::open(&opts.source)?;
                    graph.eager_scan()?;
                    Mounted {
                        store: Arc::new(graph),
                        writer: None,
                        watcher: None,
                        temp_db: None,
                    }
                }
                _ => {
                    let temp = tempfile::Builder::new()
                        .prefix("leyline-index-")
                        .suffix(".db")
                        .tempfile()?;
                    let (_, db_path) = temp.keep().map_err(|e| e.error)?;
                    materialize(&opts.source, opts.schema.as_deref(), &db_path, opts)?;
                    let graph = IndexedGraph::open(&db_path)?;
                    graph.eager_scan()?;
                    Mounted {
                        store: Arc::new(graph),
                        writer: None,
                        watcher: None,
                        temp_db: Some(db_path),
                    }
                }
            };
            Ok(graph)
        }
    }
}

/// Mount the projection and block until SIGINT/SIGTERM.
pub fn mount(opts: &MountOptions, mountpoint: &Path) -> Result<()> {
    if opts.agent_mode && !mountpoint.exists() {
        std::fs::create_dir_all(mountpoint)?;
    }

    let mounted = open_projection(opts)?;
    let writer_handles = mounted.writer.as_ref().map(|graph| {
        Arc::new(WriterHandles {
            graph: Arc::clone(graph),
            writeback: WriteBack::new(),
        })
    });
    let adapter = ProjectionFs::new(Arc::clone(&mounted.store), writer_handles);

    let mut mount_options = vec![
        MountOption::FSName("leyline".to_string()),
        MountOption::DefaultPermissions,
    ];
    if mounted.writer.is_none() {
        mount_options.push(MountOption::RO);
    }
    let session = fuser::spawn_mount2(adapter, mountpoint, &mount_options)?;
    info!(mountpoint = %mountpoint.display(), "mounted");

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&term))?;
    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("unmount requested");

    // Teardown order matters: unmount, final flush, stop the watcher,
    // drop the graph, remove the extracted image.
    drop(session);
    if let Some(writer) = &mounted.writer {
        writer.flush_now()?;
    }
    drop(mounted.watcher);
    drop(mounted.store);
    drop(mounted.writer);
    if let Some(temp_db) = &mounted.temp_db {
        let _ = std::fs::remove_file(temp_db);
    }
    if opts.agent_mode {
        let _ = std::fs::remove_dir(mountpoint);
    }
    Ok(())
}
