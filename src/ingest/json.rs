//! JSON record loading and the JSON-path-like selector dialect.
//!
//! Selector grammar (dispatch already decided this is not a tree-sitter
//! S-expression):
//!
//! ```text
//! $ | . | (empty)          the context record itself
//! $[*] | [*]               array elements (identity on non-arrays)
//! $.a.b | .a.b             the sub-value at a dotted path
//!                          (arrays fan out into one match per element)
//! ?path=value              the record, if field text equals value
//! ?path@a..b=value         the record, if byte slice [a..b) of the
//!                          field text equals value
//! ```
//!
//! Predicates applied to an array context filter its elements, so a
//! partition selector both fans out and filters in one step.

use std::path::Path;

use serde_json::Value;

use crate::error::{ProjectionError, Result};
use crate::record::{value_to_text, Record};

/// Load one record or an array of records from a JSON document.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| ProjectionError::Parse {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(explode(value))
}

/// An array becomes one record per element; anything else is a single
/// record.
pub fn explode(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items.into_iter().map(Record::Json).collect(),
        other => vec![Record::Json(other)],
    }
}

/// Evaluate a JSON selector against a record context.
pub fn eval_selector(record: &Record, selector: &str) -> Result<Vec<Record>> {
    let selector = selector.trim();
    match selector {
        "" | "$" | "." => Ok(vec![record.clone()]),
        "$[*]" | "[*]" => Ok(match record {
            Record::Json(Value::Array(items)) => {
                items.iter().cloned().map(Record::Json).collect()
            }
            other => vec![other.clone()],
        }),
        _ if selector.starts_with('?') => {
            let predicate = Predicate::parse(&selector[1..], selector)?;
            Ok(match record {
                Record::Json(Value::Array(items)) => items
                    .iter()
                    .cloned()
                    .map(Record::Json)
                    .filter(|r| predicate.matches(r))
                    .collect(),
                other if predicate.matches(other) => vec![other.clone()],
                _ => Vec::new(),
            })
        }
        _ => {
            let path = selector.trim_start_matches('$').trim_matches('.');
            Ok(match record.get_field(path) {
                Some(Value::Array(items)) => {
                    items.into_iter().map(Record::Json).collect()
                }
                Some(value) => vec![Record::Json(value)],
                None => Vec::new(),
            })
        }
    }
}

/// Parsed predicate: `path=value` or `path@a..b=value`.
struct Predicate {
    path: String,
    range: Option<(usize, usize)>,
    expected: String,
}

impl Predicate {
    fn parse(body: &str, selector: &str) -> Result<Self> {
        let (lhs, expected) = body.split_once('=').ok_or_else(|| {
            ProjectionError::Selector(format!("predicate without '=': {selector}"))
        })?;

        let (path, range) = match lhs.split_once('@') {
            Some((path, range_text)) => {
                let (a, b) = range_text.split_once("..").ok_or_else(|| {
                    ProjectionError::Selector(format!("bad slice range: {selector}"))
                })?;
                let a: usize = a.parse().map_err(|_| {
                    ProjectionError::Selector(format!("bad slice bound: {selector}"))
                })?;
                let b: usize = b.parse().map_err(|_| {
                    ProjectionError::Selector(format!("bad slice bound: {selector}"))
                })?;
                (path, Some((a, b)))
            }
            None => (lhs, None),
        };
        Ok(Self {
            path: path.to_string(),
            range,
            expected: expected.to_string(),
        })
    }

    fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get_field(&self.path) else {
            return false;
        };
        let text = value_to_text(&value);
        let actual = match self.range {
            Some((a, b)) => {
                let a = a.min(text.len());
                let b = b.clamp(a, text.len());
                &text[a..b]
            }
            None => text.as_str(),
        };
        actual == self.expected
    }
}
