//! Name and content templates.
//!
//! The dialect is deliberately tiny: `{{.field.path}}` substitution,
//! `{{slice .field a b}}` for byte-range slicing, and a `| json` filter.
//! Undefined fields render to the empty string — rendering never fails,
//! only parsing can.

use serde_json::Value;

use crate::error::{ProjectionError, Result};
use crate::record::{value_to_text, Record};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Expr {
        path: String,
        slice: Option<(usize, usize)>,
        json: bool,
    },
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text. Errors on unterminated `{{` and on malformed
    /// expressions; plain text without placeholders is a valid template.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                ProjectionError::InvalidTopology(format!("unterminated '{{{{' in template: {source}"))
            })?;
            segments.push(parse_expr(after[..close].trim(), source)?);
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original template text (topology round-trips store this).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a record. Undefined fields become empty strings.
    pub fn render(&self, record: &Record) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr { path, slice, json } => {
                    let value = record.get_field(path);
                    let text = match (value, json) {
                        (None, _) => String::new(),
                        (Some(v), true) => render_json(&v),
                        (Some(v), false) => value_to_text(&v),
                    };
                    match slice {
                        Some((start, end)) => {
                            let start = (*start).min(text.len());
                            let end = (*end).clamp(start, text.len());
                            out.push_str(&text[start..end]);
                        }
                        None => out.push_str(&text),
                    }
                }
            }
        }
        out
    }
}

fn parse_expr(expr: &str, template: &str) -> Result<Segment> {
    let mut parts = expr.splitn(2, '|');
    let head = parts.next().unwrap_or("").trim();
    let json = match parts.next().map(str::trim) {
        None => false,
        Some("json") => true,
        Some(other) => {
            return Err(ProjectionError::InvalidTopology(format!(
                "unknown template filter '{other}' in: {template}"
            )))
        }
    };

    let tokens: Vec<&str> = head.split_whitespace().collect();
    match tokens.as_slice() {
        [path] if path.starts_with('.') => Ok(Segment::Expr {
            path: path.to_string(),
            slice: None,
            json,
        }),
        ["slice", path, start, end] if path.starts_with('.') => {
            let start: usize = start.parse().map_err(|_| {
                ProjectionError::InvalidTopology(format!("bad slice bound in: {template}"))
            })?;
            let end: usize = end.parse().map_err(|_| {
                ProjectionError::InvalidTopology(format!("bad slice bound in: {template}"))
            })?;
            Ok(Segment::Expr {
                path: path.to_string(),
                slice: Some((start, end)),
                json,
            })
        }
        _ => Err(ProjectionError::InvalidTopology(format!(
            "malformed template expression '{expr}' in: {template}"
        ))),
    }
}

/// `| json` output: pretty-printed with a trailing newline, the way the
/// projected `raw.json` files read under `cat`.
fn render_json(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_default();
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        Record::Json(json!({
            "identifier": "KEV-2023-0001",
            "item": {"cveID": "CVE-2023-1234", "published": "2023-07-15"}
        }))
    }

    #[test]
    fn test_literal_passthrough() {
        let t = Template::parse("vulns").unwrap();
        assert_eq!(t.render(&record()), "vulns");
    }

    #[test]
    fn test_field_substitution() {
        let t = Template::parse("{{.item.cveID}}").unwrap();
        assert_eq!(t.render(&record()), "CVE-2023-1234");
    }

    #[test]
    fn test_mixed_literal_and_field() {
        let t = Template::parse("cve-{{.item.cveID}}.txt").unwrap();
        assert_eq!(t.render(&record()), "cve-CVE-2023-1234.txt");
    }

    #[test]
    fn test_undefined_field_renders_empty() {
        let t = Template::parse("[{{.nope.nothing}}]").unwrap();
        assert_eq!(t.render(&record()), "[]");
    }

    #[test]
    fn test_slice_year_month() {
        let year = Template::parse("{{slice .item.published 0 4}}").unwrap();
        let month = Template::parse("{{slice .item.published 5 7}}").unwrap();
        assert_eq!(year.render(&record()), "2023");
        assert_eq!(month.render(&record()), "07");
    }

    #[test]
    fn test_slice_clamps_out_of_range() {
        let t = Template::parse("{{slice .identifier 0 999}}").unwrap();
        assert_eq!(t.render(&record()), "KEV-2023-0001");
        let t = Template::parse("{{slice .identifier 50 60}}").unwrap();
        assert_eq!(t.render(&record()), "");
    }

    #[test]
    fn test_json_filter_whole_record() {
        let t = Template::parse("{{. | json}}").unwrap();
        let rendered = t.render(&record());
        assert!(rendered.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, record().to_value());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Template::parse("{{.x").is_err());
        assert!(Template::parse("{{.x | yaml}}").is_err());
        assert!(Template::parse("{{slice .x a b}}").is_err());
        assert!(Template::parse("{{frobnicate}}").is_err());
    }

    #[test]
    fn test_source_preserved() {
        let src = "{{slice .d 0 4}}-{{.n}}";
        assert_eq!(Template::parse(src).unwrap().source(), src);
    }
}
