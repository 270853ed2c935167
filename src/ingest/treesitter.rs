//! Tree-sitter plumbing for the ingestion engine.
//!
//! Parsers are not thread-safe, so each worker thread keeps its own
//! (language is set per borrow). Queries are immutable and compiled once
//! per (language, selector) into a process-wide cache.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use streaming_iterator::StreamingIterator;
use tree_sitter::{Parser, Query, QueryCursor, Tree};

use crate::error::{ProjectionError, Result};
use crate::lang::Language;
use crate::record::AstRecord;

thread_local! {
    static PARSERS: RefCell<HashMap<&'static str, Parser>> = RefCell::new(HashMap::new());
}

fn query_cache() -> &'static Mutex<HashMap<(Language, String), Arc<Query>>> {
    static CACHE: OnceLock<Mutex<HashMap<(Language, String), Arc<Query>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Parse `source` with the calling thread's parser for `language`.
pub fn parse(language: Language, source: &str) -> Result<Tree> {
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        let parser = parsers.entry(language.name()).or_insert_with(Parser::new);
        parser
            .set_language(&language.grammar())
            .map_err(|e| ProjectionError::Language(format!("{}: {e}", language.name())))?;
        parser.parse(source, None).ok_or_else(|| ProjectionError::Parse {
            file: Path::new("<buffer>").to_path_buf(),
            message: "parser returned no tree".into(),
        })
    })
}

/// Compile (or fetch the cached) query for a selector.
pub fn compiled_query(language: Language, selector: &str) -> Result<Arc<Query>> {
    let key = (language, selector.to_string());
    let mut cache = query_cache().lock().expect("query cache poisoned");
    if let Some(query) = cache.get(&key) {
        return Ok(Arc::clone(query));
    }
    let query = Query::new(&language.grammar(), selector)
        .map_err(|e| ProjectionError::Selector(format!("{selector}: {e}")))?;
    let query = Arc::new(query);
    cache.insert(key, Arc::clone(&query));
    Ok(query)
}

/// True when the parsed tree contains error or missing nodes.
pub fn has_syntax_errors(language: Language, source: &str) -> Result<bool> {
    Ok(parse(language, source)?.root_node().has_error())
}

/// Validate a write-back buffer: the parse must succeed without error
/// nodes.
pub fn validate_snippet(source: &str, language: Language) -> Result<()> {
    let tree = parse(language, source)?;
    let root = tree.root_node();
    if root.has_error() {
        let position = first_error_offset(root).unwrap_or(0);
        return Err(ProjectionError::Validation(format!(
            "{} syntax error near byte {position}",
            language.name()
        )));
    }
    Ok(())
}

fn first_error_offset(node: tree_sitter::Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_byte());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(offset) = first_error_offset(child) {
                return Some(offset);
            }
        }
    }
    None
}

/// Run a selector against `source` and materialize one `AstRecord` per
/// match.
///
/// Captures: `@def` (or the first capture) anchors the record's byte
/// range and kind; `@name` supplies the name. `byte_offset` shifts the
/// recorded origins when `source` is itself a slice of a larger file
/// (nested selectors).
pub fn collect_matches(
    source: &str,
    file: &Path,
    language: Language,
    selector: &str,
    byte_offset: u64,
) -> Result<Vec<AstRecord>> {
    let tree = parse(language, source)?;
    let query = compiled_query(language, selector)?;
    let def_index = query.capture_index_for_name("def");
    let name_index = query.capture_index_for_name("name");

    let mut out = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), source.as_bytes());
    while let Some(m) = matches.next() {
        let def_node = match def_index {
            Some(index) => m.captures.iter().find(|c| c.index == index).map(|c| c.node),
            None => m.captures.first().map(|c| c.node),
        };
        let Some(def_node) = def_node else { continue };

        let name = name_index
            .and_then(|index| m.captures.iter().find(|c| c.index == index))
            .map(|c| source[c.node.byte_range()].to_string())
            .unwrap_or_default();

        out.push(AstRecord {
            kind: def_node.kind().to_string(),
            name,
            body: source[def_node.byte_range()].to_string(),
            file: file.to_path_buf(),
            start_byte: byte_offset + def_node.start_byte() as u64,
            end_byte: byte_offset + def_node.end_byte() as u64,
            language,
        });
    }
    out.sort_by_key(|r| r.start_byte);
    Ok(out)
}

/// All definition-kind matches in a source file, for schema inference.
pub fn scan_definitions(source: &str, file: &Path, language: Language) -> Result<Vec<AstRecord>> {
    let mut out = Vec::new();
    for kind in language.definition_kinds() {
        if let Some(selector) = language.definition_query(kind) {
            out.extend(collect_matches(source, file, language, selector, 0)?);
        }
    }
    out.sort_by_key(|r| r.start_byte);
    Ok(out)
}
