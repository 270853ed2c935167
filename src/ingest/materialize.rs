//! Topology traversal and node materialization.
//!
//! Depth-first over the topology: each node definition's selector is
//! evaluated in the current context (the root record set, or the parent
//! match), every match renders the name template and produces a
//! directory, children recurse with the match as context, and leaf
//! files render their content templates. Sibling name collisions
//! upsert — last wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::Value;
use tracing::warn;

use crate::error::{ProjectionError, Result};
use crate::graph::{child_id, now_unix, GraphNode, NodeSink, Origin, ROOT_ID};
use crate::ingest::{json, treesitter};
use crate::lang::{CallExtractor, Language};
use crate::record::{AstRecord, Record};
use crate::template::Template;
use crate::topology::{NodeDef, SelectorKind, Topology};

/// One parsed source file held in memory during ingestion.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    pub language: Language,
    pub mtime: u64,
}

/// Counters reported after ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub directories: usize,
    pub files: usize,
    pub refs: usize,
    pub parse_errors: usize,
}

#[derive(Clone)]
enum Context {
    /// The source tree (tree-sitter selectors fan out over it).
    Files(Arc<Vec<SourceFile>>),
    /// A single match (record) from the parent level.
    Record(Record),
}

pub struct Materializer<'a> {
    topology: &'a Topology,
    extractor: &'a dyn CallExtractor,
    file_mtimes: HashMap<PathBuf, u64>,
    now: u64,
    stats: IngestStats,
}

impl<'a> Materializer<'a> {
    pub fn new(topology: &'a Topology, extractor: &'a dyn CallExtractor) -> Self {
        Self {
            topology,
            extractor,
            file_mtimes: HashMap::new(),
            now: now_unix(),
            stats: IngestStats::default(),
        }
    }

    /// Materialize a record-shaped source (JSON documents, commit
    /// records). The root context is the full record array.
    pub fn materialize_records(
        mut self,
        records: &[Record],
        sink: &mut dyn NodeSink,
    ) -> Result<IngestStats> {
        let values: Vec<Value> = records.iter().map(|r| r.to_value()).collect();
        let ctx = Context::Record(Record::Json(Value::Array(values)));
        for def in &self.topology.nodes {
            self.walk(def, &ctx, ROOT_ID, sink)?;
        }
        Ok(self.stats)
    }

    /// Materialize a source tree.
    pub fn materialize_tree(
        mut self,
        files: Vec<SourceFile>,
        sink: &mut dyn NodeSink,
    ) -> Result<IngestStats> {
        self.file_mtimes = files
            .iter()
            .map(|f| (f.path.clone(), f.mtime))
            .collect();
        let ctx = Context::Files(Arc::new(files));
        for def in &self.topology.nodes {
            self.walk(def, &ctx, ROOT_ID, sink)?;
        }
        Ok(self.stats)
    }

    fn walk(
        &mut self,
        def: &NodeDef,
        ctx: &Context,
        parent_id: &str,
        sink: &mut dyn NodeSink,
    ) -> Result<()> {
        let name_template = Template::parse(&def.name)?;
        for m in self.eval(def, ctx)? {
            let record = match &m {
                Context::Record(record) => Some(record.clone()),
                Context::Files(_) => None,
            };
            let rendered = match &record {
                Some(record) => name_template.render(record),
                None => name_template.render(&Record::Json(Value::Null)),
            };
            let name = sanitize_name(&rendered);
            if name.is_empty() {
                warn!(template = %def.name, "name template rendered empty, skipping match");
                continue;
            }

            let dir_id = child_id(parent_id, &name);
            let mtime = self.record_mtime(record.as_ref());
            let mut dir = GraphNode::directory(dir_id.clone(), mtime);
            if let Some(record) = &record {
                dir.record_id = Some(record.record_id());
            }
            sink.insert_node(dir)?;
            self.stats.directories += 1;

            // Definition directories anchor the defs edge table. Only
            // fresh tree-sitter matches count — identity selectors pass
            // the parent's AST record through to grouping directories.
            if def.selector_kind() == SelectorKind::TreeSitter {
                if let Some(Record::Ast(ast)) = &record {
                    if !ast.name.is_empty() {
                        sink.insert_def(&ast.name, &dir_id)?;
                    }
                }
            }

            for child in def.children() {
                self.walk(child, &m, &dir_id, sink)?;
            }

            if let Some(record) = &record {
                for leaf in def.files() {
                    self.emit_leaf(leaf, record, &dir_id, mtime, sink)?;
                }
            }
        }
        Ok(())
    }

    fn emit_leaf(
        &mut self,
        leaf: &crate::topology::LeafFile,
        record: &Record,
        dir_id: &str,
        mtime: u64,
        sink: &mut dyn NodeSink,
    ) -> Result<()> {
        let name = sanitize_name(&Template::parse(&leaf.name)?.render(record));
        if name.is_empty() {
            return Ok(());
        }
        let content = Template::parse(&leaf.content_template)?.render(record);
        let file_id = child_id(dir_id, &name);

        let mut node = GraphNode::file(file_id.clone(), content.clone().into_bytes(), mtime)
            .with_record_id(record.record_id());
        if let Some((file_path, start_byte, end_byte)) = record.origin() {
            node = node.with_origin(Origin {
                file_path,
                start_byte,
                end_byte,
            });
        }
        sink.insert_node(node)?;
        self.stats.files += 1;

        // Ref extraction for source-bearing records.
        if let Some(language) = record.language() {
            if !content.is_empty() {
                let path = record
                    .origin()
                    .map(|(p, _, _)| p)
                    .unwrap_or_default();
                for call in self.extractor.extract(&content, &path, language) {
                    sink.insert_ref(&call.token, &file_id)?;
                    self.stats.refs += 1;
                }
            }
        }
        Ok(())
    }

    fn record_mtime(&self, record: Option<&Record>) -> u64 {
        match record {
            Some(Record::Ast(ast)) => self
                .file_mtimes
                .get(&ast.file)
                .copied()
                .unwrap_or(self.now),
            _ => self.now,
        }
    }

    fn eval(&mut self, def: &NodeDef, ctx: &Context) -> Result<Vec<Context>> {
        match (def.selector_kind(), ctx) {
            (SelectorKind::TreeSitter, Context::Files(files)) => {
                let language = self.selector_language(def, None)?;
                let per_file: Vec<(Vec<AstRecord>, usize)> = files
                    .par_iter()
                    .filter(|f| f.language == language)
                    .map(|f| match_file(f, language, &def.selector))
                    .collect();
                let mut records = Vec::new();
                for (matched, errors) in per_file {
                    self.stats.parse_errors += errors;
                    records.extend(matched);
                }
                records.sort_by(|a, b| (&a.file, a.start_byte).cmp(&(&b.file, b.start_byte)));
                Ok(records
                    .into_iter()
                    .map(|r| Context::Record(Record::Ast(r)))
                    .collect())
            }
            (SelectorKind::TreeSitter, Context::Record(Record::Ast(ast))) => {
                let language = self.selector_language(def, Some(ast.language))?;
                let records = treesitter::collect_matches(
                    &ast.body,
                    &ast.file,
                    language,
                    &def.selector,
                    ast.start_byte,
                )?;
                Ok(records
                    .into_iter()
                    // The context node itself matches same-kind queries.
                    .filter(|r| !(r.start_byte == ast.start_byte && r.end_byte == ast.end_byte))
                    .map(|r| Context::Record(Record::Ast(r)))
                    .collect())
            }
            (SelectorKind::TreeSitter, Context::Record(_)) => Ok(Vec::new()),
            (SelectorKind::JsonPath, Context::Record(record)) => {
                Ok(json::eval_selector(record, &def.selector)?
                    .into_iter()
                    .map(Context::Record)
                    .collect())
            }
            // A literal grouping directory above the source tree.
            (SelectorKind::JsonPath, Context::Files(_)) => Ok(vec![ctx.clone()]),
        }
    }

    fn selector_language(&self, def: &NodeDef, inherited: Option<Language>) -> Result<Language> {
        match (&def.language, inherited) {
            (Some(tag), _) => Language::from_name(tag),
            (None, Some(language)) => Ok(language),
            (None, None) => Err(ProjectionError::InvalidTopology(format!(
                "tree-sitter selector without language: {}",
                def.selector
            ))),
        }
    }
}

fn match_file(
    file: &SourceFile,
    language: Language,
    selector: &str,
) -> (Vec<AstRecord>, usize) {
    match treesitter::has_syntax_errors(language, &file.text) {
        Ok(false) => match treesitter::collect_matches(&file.text, &file.path, language, selector, 0)
        {
            Ok(records) => (records, 0),
            Err(e) => {
                warn!(file = %file.path.display(), error = %e, "selector failed, skipping file");
                (Vec::new(), 1)
            }
        },
        Ok(true) => {
            warn!(file = %file.path.display(), "syntax errors, skipping file");
            (Vec::new(), 1)
        }
        Err(e) => {
            warn!(file = %file.path.display(), error = %e, "parse failed, skipping file");
            (Vec::new(), 1)
        }
    }
}

/// Rendered names become path segments; path separators and dot-names
/// are flattened.
fn sanitize_name(name: &str) -> String {
    let name = name.trim().replace('/', "_");
    if name == "." || name == ".." {
        return String::new();
    }
    name
}
