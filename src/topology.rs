//! The declarative schema: a tree of node definitions with selectors,
//! name templates, and leaf files.
//!
//! A topology is user-authored or inferred, serializes as a single JSON
//! document, and round-trips exactly (`parse(render(T)) = T`).

use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};
use crate::lang::Language;
use crate::template::Template;

/// Current topology document version.
pub const TOPOLOGY_VERSION: &str = "1";

/// How a selector is evaluated. Dispatch is by shape: a `(` as the first
/// non-space byte means a tree-sitter S-expression, anything else is
/// JSON-path-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    TreeSitter,
    JsonPath,
}

/// Classify a selector by shape.
pub fn selector_kind(selector: &str) -> SelectorKind {
    if selector.trim_start().starts_with('(') {
        SelectorKind::TreeSitter
    } else {
        SelectorKind::JsonPath
    }
}

/// Top-level schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub version: String,
    pub nodes: Vec<NodeDef>,
}

/// One directory level of the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Name template: literal or `{{.field}}` expression.
    pub name: String,

    /// Match selector, evaluated in the parent's record context.
    /// Empty selects the current context itself.
    pub selector: String,

    /// Language tag for tree-sitter selectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Nested directory levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeDef>>,

    /// Leaf files materialized per match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<LeafFile>>,
}

/// A projected file under a node directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafFile {
    pub name: String,
    pub content_template: String,
}

impl Topology {
    pub fn new(nodes: Vec<NodeDef>) -> Self {
        Self {
            version: TOPOLOGY_VERSION.to_string(),
            nodes,
        }
    }

    /// Render as a JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from a JSON document and validate.
    pub fn from_json(text: &str) -> Result<Self> {
        let topology: Topology = serde_json::from_str(text)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Structural validation: rejected topologies fail the mount.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ProjectionError::InvalidTopology(
                "topology has no nodes".into(),
            ));
        }
        for node in &self.nodes {
            node.validate()?;
        }
        Ok(())
    }

    /// All language tags appearing anywhere in the tree.
    pub fn languages(&self) -> Vec<Language> {
        let mut out = Vec::new();
        fn visit(node: &NodeDef, out: &mut Vec<Language>) {
            if let Some(tag) = &node.language {
                if let Ok(lang) = Language::from_name(tag) {
                    if !out.contains(&lang) {
                        out.push(lang);
                    }
                }
            }
            for child in node.children() {
                visit(child, out);
            }
        }
        for node in &self.nodes {
            visit(node, &mut out);
        }
        out
    }
}

impl NodeDef {
    /// A node with no children and no files.
    pub fn new(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            language: None,
            children: None,
            files: None,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language.name().to_string());
        self
    }

    pub fn with_children(mut self, children: Vec<NodeDef>) -> Self {
        self.children = if children.is_empty() {
            None
        } else {
            Some(children)
        };
        self
    }

    pub fn with_files(mut self, files: Vec<LeafFile>) -> Self {
        self.files = if files.is_empty() { None } else { Some(files) };
        self
    }

    /// Child definitions (empty slice when absent).
    pub fn children(&self) -> &[NodeDef] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Leaf files (empty slice when absent).
    pub fn files(&self) -> &[LeafFile] {
        self.files.as_deref().unwrap_or(&[])
    }

    pub fn selector_kind(&self) -> SelectorKind {
        selector_kind(&self.selector)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ProjectionError::InvalidTopology(
                "node with empty name template".into(),
            ));
        }
        Template::parse(&self.name)?;
        if let Some(tag) = &self.language {
            Language::from_name(tag)?;
        }
        if self.selector_kind() == SelectorKind::TreeSitter && self.language.is_none() {
            return Err(ProjectionError::InvalidTopology(format!(
                "tree-sitter selector without a language tag: {}",
                self.selector
            )));
        }
        for file in self.files() {
            if file.name.is_empty() {
                return Err(ProjectionError::InvalidTopology(
                    "leaf file with empty name".into(),
                ));
            }
            Template::parse(&file.name)?;
            Template::parse(&file.content_template)?;
        }
        for child in self.children() {
            child.validate()?;
        }
        Ok(())
    }
}

impl LeafFile {
    pub fn new(name: impl Into<String>, content_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_template: content_template.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_topology() -> Topology {
        Topology::new(vec![NodeDef::new("vulns", "$")
            .with_children(vec![NodeDef::new("{{.item.cveID}}", "$[*]").with_files(vec![
                LeafFile::new("vendor", "{{.item.vendorProject}}"),
                LeafFile::new("raw.json", "{{. | json}}"),
            ])])])
    }

    #[test]
    fn test_json_roundtrip_exact() {
        let topology = sample_topology();
        let rendered = topology.to_json().unwrap();
        let parsed = Topology::from_json(&rendered).unwrap();
        assert_eq!(parsed, topology);
        // And the re-render is byte-identical.
        assert_eq!(parsed.to_json().unwrap(), rendered);
    }

    #[test]
    fn test_absent_optionals_stay_absent() {
        let rendered = sample_topology().to_json().unwrap();
        // The leaf node has no children; the key must not appear.
        assert!(!rendered.contains("\"children\": null"));
        assert!(!rendered.contains("\"language\""));
    }

    #[test]
    fn test_selector_shape_dispatch() {
        assert_eq!(selector_kind("$[*]"), SelectorKind::JsonPath);
        assert_eq!(selector_kind("?kind=network"), SelectorKind::JsonPath);
        assert_eq!(
            selector_kind("(function_declaration name: (_) @name) @def"),
            SelectorKind::TreeSitter
        );
        assert_eq!(selector_kind("  (call)"), SelectorKind::TreeSitter);
    }

    #[test]
    fn test_validation_rejects_bad_template() {
        let mut topology = sample_topology();
        topology.nodes[0].name = "{{broken".into();
        assert!(matches!(
            topology.validate(),
            Err(ProjectionError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty() {
        let topology = Topology::new(vec![]);
        assert!(topology.validate().is_err());
    }

    #[test]
    fn test_tree_sitter_selector_requires_language() {
        let topology = Topology::new(vec![NodeDef::new(
            "{{.name}}",
            "(function_declaration) @def",
        )]);
        assert!(topology.validate().is_err());

        let topology = Topology::new(vec![NodeDef::new(
            "{{.name}}",
            "(function_declaration) @def",
        )
        .with_language(Language::Go)]);
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn test_languages_collected_once() {
        let topology = Topology::new(vec![
            NodeDef::new("functions", "").with_language(Language::Go),
            NodeDef::new("types", "").with_language(Language::Go),
        ]);
        assert_eq!(topology.languages(), vec![Language::Go]);
    }
}
