//! Leyline — semantic overlay engine.
//!
//! Projects heterogeneous structured data (source-code ASTs, JSON
//! records, commit history) as a schema-driven virtual filesystem:
//!
//! - `fca` / `infer` derive a projection schema (`Topology`) from
//!   sampled records via Formal Concept Analysis or greedy entropy
//!   partitioning;
//! - `ingest` walks a source, parses it (tree-sitter per language), and
//!   materializes a node graph;
//! - `graph` stores the nodes — in memory or in an embedded relational
//!   image — with virtual callers/callees directories;
//! - `control` + `arena` + `flusher` implement the double-buffered
//!   hot-swap region that lets one process atomically replace the
//!   mounted view from another;
//! - `writeback` validates, formats, and splices edits back into source
//!   files, updating the graph in place;
//! - `fs` adapts the graph to FUSE; `mount` wires the whole flow.

pub mod arena;
pub mod control;
pub mod error;
pub mod fca;
pub mod flusher;
pub mod fs;
pub mod graph;
pub mod infer;
pub mod ingest;
pub mod lang;
pub mod mount;
pub mod record;
pub mod template;
pub mod topology;
pub mod writeback;

pub use error::{ProjectionError, Result};
pub use graph::{GraphNode, NodeKind, NodeSink, NodeStore, Origin};
pub use mount::{mount, MountOptions};
pub use record::Record;
pub use topology::{LeafFile, NodeDef, Topology};
