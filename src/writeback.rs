//! Write-back: push an edit on a projected file into its source file.
//!
//! Five steps, in order:
//!
//! 1. Validate — the buffer must parse cleanly in the node's language.
//!    Rejected buffers are kept as drafts and surfaced under
//!    `_diagnostics/`; the mount still reports the write as successful.
//! 2. Format — best-effort through the `Formatter` seam.
//! 3. Splice — replace `[origin.start, origin.end)` in the source file.
//! 4. Surgical update — new content, new origin end, and a delta shift
//!    of every later origin in the same file. No re-ingestion.
//! 5. Invalidate cached state for the node.
//!
//! Linting is advisory: findings land under `_diagnostics/lint`.

use tracing::{debug, warn};

use crate::error::{ProjectionError, Result};
use crate::graph::{child_id, now_unix, GraphNode, NodeStore, WritableGraph};
use crate::ingest::treesitter;
use crate::lang::{Formatter, Language, Linter, NoopLinter, PassthroughFormatter};

const DIAGNOSTICS_DIR: &str = "_diagnostics";
const LINT_DIR: &str = "_diagnostics/lint";

/// What happened to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The edit reached the source file; `delta` is the byte-length
    /// change of the spliced range.
    Applied { delta: i64 },
    /// Validation rejected the edit; it is parked as a draft.
    Draft { diagnostic: String },
}

pub struct WriteBack {
    formatter: Box<dyn Formatter>,
    linter: Box<dyn Linter>,
}

impl Default for WriteBack {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBack {
    pub fn new() -> Self {
        Self {
            formatter: Box::new(PassthroughFormatter),
            linter: Box::new(NoopLinter),
        }
    }

    pub fn with_formatter(mut self, formatter: Box<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_linter(mut self, linter: Box<dyn Linter>) -> Self {
        self.linter = linter;
        self
    }

    /// Run the pipeline for an edit on `node_id`.
    pub fn apply(
        &self,
        graph: &WritableGraph,
        node_id: &str,
        new_bytes: &[u8],
    ) -> Result<WriteOutcome> {
        let node = graph.get_node(node_id)?;
        if node.is_dir() {
            return Err(ProjectionError::IsADirectory(node_id.to_string()));
        }
        let origin = node.origin.clone().ok_or_else(|| {
            ProjectionError::Validation(format!("{node_id} has no source origin"))
        })?;
        let language = origin
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
            .ok_or_else(|| {
                ProjectionError::Language(format!(
                    "no parser for {}",
                    origin.file_path.display()
                ))
            })?;

        // 1. Validate. A rejected edit never touches the source file.
        let text = match std::str::from_utf8(new_bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                return self.park_draft(graph, node_id, new_bytes, "buffer is not UTF-8")
            }
        };
        if let Err(e) = treesitter::validate_snippet(&text, language) {
            return self.park_draft(graph, node_id, new_bytes, &e.to_string());
        }

        // 2. Format (best-effort).
        let formatted = match self.formatter.format(new_bytes, language) {
            Ok(formatted) => formatted,
            Err(e) => {
                warn!(error = %e, "formatter failed, using buffer as-is");
                new_bytes.to_vec()
            }
        };

        // 3. Splice into the source file.
        let source = std::fs::read(&origin.file_path)?;
        let (start, old_end) = (origin.start_byte as usize, origin.end_byte as usize);
        if start > old_end || old_end > source.len() {
            return Err(ProjectionError::Corruption(format!(
                "origin [{start}, {old_end}) out of bounds for {} ({} bytes)",
                origin.file_path.display(),
                source.len()
            )));
        }
        let mut spliced = Vec::with_capacity(source.len() + formatted.len());
        spliced.extend_from_slice(&source[..start]);
        spliced.extend_from_slice(&formatted);
        spliced.extend_from_slice(&source[old_end..]);
        std::fs::write(&origin.file_path, &spliced)?;

        // 4. Surgical graph update + sibling origin shift.
        let delta = formatted.len() as i64 - (old_end - start) as i64;
        let mtime = std::fs::metadata(&origin.file_path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_else(now_unix);
        let store = graph.graph();
        store.update_content(node_id, &formatted, mtime)?;
        store.set_origin(
            node_id,
            origin.start_byte,
            origin.start_byte + formatted.len() as u64,
        )?;
        let file_key = origin.file_path.display().to_string();
        let shifted = store.shift_origins(&file_key, origin.end_byte, delta, node_id)?;
        debug!(node_id, delta, shifted, "write-back spliced");

        // 5. Invalidate.
        graph.invalidate(node_id);

        // Advisory lint, never blocking.
        let findings = self.linter.lint(&formatted, language);
        if !findings.is_empty() {
            let report: String = findings
                .iter()
                .map(|d| match d.line {
                    Some(line) => format!("{line}: {}\n", d.message),
                    None => format!("{}\n", d.message),
                })
                .collect();
            self.emit_diagnostic(graph, LINT_DIR, node_id, report.as_bytes())?;
        }

        graph.flush();
        Ok(WriteOutcome::Applied { delta })
    }

    /// Validation failure path: keep the buffer as a draft and expose
    /// the diagnostic. The write still succeeds from the mount's view.
    fn park_draft(
        &self,
        graph: &WritableGraph,
        node_id: &str,
        buffer: &[u8],
        diagnostic: &str,
    ) -> Result<WriteOutcome> {
        graph.graph().set_draft(node_id, Some(buffer))?;
        self.emit_diagnostic(graph, DIAGNOSTICS_DIR, node_id, diagnostic.as_bytes())?;
        graph.flush();
        warn!(node_id, diagnostic, "edit rejected, parked as draft");
        Ok(WriteOutcome::Draft {
            diagnostic: diagnostic.to_string(),
        })
    }

    fn emit_diagnostic(
        &self,
        graph: &WritableGraph,
        dir: &str,
        node_id: &str,
        content: &[u8],
    ) -> Result<()> {
        let store = graph.graph();
        let now = now_unix();
        store.upsert_node(&GraphNode::directory(DIAGNOSTICS_DIR, now))?;
        if dir != DIAGNOSTICS_DIR {
            store.upsert_node(&GraphNode::directory(dir, now))?;
        }
        let name = node_id.replace('/', "_");
        store.upsert_node(&GraphNode::file(
            child_id(dir, &name),
            content.to_vec(),
            now,
        ))?;
        Ok(())
    }
}
