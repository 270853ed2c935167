//! Runtime record model.
//!
//! Every data source is normalized to a `Record` — a tagged variant over
//! the shapes the engine understands (JSON value, AST match, commit).
//! All field access goes through `get_field` with a dotted path; nothing
//! downstream reflects on the concrete shape.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::lang::Language;

/// A single source record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A JSON value (one element of an ingested document or array).
    Json(Value),
    /// A matched AST node from a parsed source file.
    Ast(AstRecord),
    /// One commit from a history loader.
    Commit(CommitRecord),
}

/// A record materialized from a tree-sitter match.
///
/// `body` is the full text of the matched node — the byte range
/// `[start_byte, end_byte)` of the source file, which write-back uses as
/// its splice anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct AstRecord {
    pub kind: String,
    pub name: String,
    pub body: String,
    pub file: PathBuf,
    pub start_byte: u64,
    pub end_byte: u64,
    pub language: Language,
}

/// One commit record. Produced by an external history loader; the shape
/// is fixed here so selectors and templates can address it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    pub files: Vec<String>,
}

impl Record {
    /// Resolve a dotted field path. `""` and `"."` yield the whole record.
    ///
    /// JSON records walk object keys (and numeric array indices); the
    /// other shapes expose their fixed field set. Absent paths are `None`,
    /// never an error.
    pub fn get_field(&self, path: &str) -> Option<Value> {
        let path = path.trim_start_matches('$');
        let path = path.trim_matches('.');
        if path.is_empty() {
            return Some(self.to_value());
        }
        match self {
            Record::Json(value) => lookup_json(value, path),
            Record::Ast(ast) => match path {
                "type" => Some(Value::String(ast.kind.clone())),
                "name" => Some(Value::String(ast.name.clone())),
                "body" => Some(Value::String(ast.body.clone())),
                "file" => Some(Value::String(ast.file.display().to_string())),
                "start_byte" => Some(json!(ast.start_byte)),
                "end_byte" => Some(json!(ast.end_byte)),
                "language" => Some(Value::String(ast.language.name().to_string())),
                _ => None,
            },
            Record::Commit(commit) => match path {
                "hash" => Some(Value::String(commit.hash.clone())),
                "author" => Some(Value::String(commit.author.clone())),
                "date" => Some(Value::String(commit.date.clone())),
                "message" => Some(Value::String(commit.message.clone())),
                "files" => Some(json!(commit.files)),
                _ => None,
            },
        }
    }

    /// Encode the whole record as a JSON value (drives `raw.json` and the
    /// `.` template context).
    pub fn to_value(&self) -> Value {
        match self {
            Record::Json(value) => value.clone(),
            Record::Ast(ast) => json!({
                "type": ast.kind,
                "name": ast.name,
                "body": ast.body,
                "file": ast.file.display().to_string(),
                "start_byte": ast.start_byte,
                "end_byte": ast.end_byte,
                "language": ast.language.name(),
            }),
            Record::Commit(commit) => json!({
                "hash": commit.hash,
                "author": commit.author,
                "date": commit.date,
                "message": commit.message,
                "files": commit.files,
            }),
        }
    }

    /// Dotted paths of every leaf field, with their values. Objects are
    /// walked; arrays and scalars are leaves.
    pub fn leaf_fields(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        walk_leaves(&self.to_value(), String::new(), &mut out);
        out
    }

    /// Deterministic record identity (BLAKE3, 32 hex chars).
    ///
    /// AST records key on their source span so re-ingesting an unchanged
    /// file yields the same ids; JSON and commit records key on content.
    pub fn record_id(&self) -> String {
        let seed = match self {
            Record::Json(value) => value.to_string(),
            Record::Ast(ast) => format!(
                "{}:{}:{}:{}",
                ast.file.display(),
                ast.kind,
                ast.start_byte,
                ast.end_byte
            ),
            Record::Commit(commit) => commit.hash.clone(),
        };
        let hash = blake3::hash(seed.as_bytes());
        hash.to_hex()[..32].to_string()
    }

    /// Language tag, for records that carry one.
    pub fn language(&self) -> Option<Language> {
        match self {
            Record::Ast(ast) => Some(ast.language),
            _ => None,
        }
    }

    /// Source byte range, for records that carry one.
    pub fn origin(&self) -> Option<(PathBuf, u64, u64)> {
        match self {
            Record::Ast(ast) => Some((ast.file.clone(), ast.start_byte, ast.end_byte)),
            _ => None,
        }
    }
}

fn lookup_json(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

fn walk_leaves(value: &Value, prefix: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                walk_leaves(child, path, out);
            }
        }
        other => {
            if !prefix.is_empty() {
                out.insert(prefix, other.clone());
            }
        }
    }
}

/// Render a JSON value as template text: strings bare, scalars via
/// display, null empty, compound values as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
