//! Language registry: extension dispatch, tree-sitter grammars, and the
//! per-language rules the projection pipeline consults.
//!
//! Collaborator seams (formatters, linters, call extractors) live in the
//! submodules; the engine only ever talks to the traits.

pub mod extract;
pub mod format;

pub use extract::{CallExtractor, CallRef, IdentifierExtractor};
pub use format::{Diagnostic, Formatter, Linter, NoopLinter, PassthroughFormatter};

use crate::error::{ProjectionError, Result};

/// Languages the ingestion engine can parse natively.
///
/// `Json` carries a grammar for write-back validation of projected
/// JSON documents; JSON *records* flow through the record pipeline and
/// never produce definition directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Go,
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Json,
}

impl Language {
    /// All supported languages, in deterministic order.
    pub const ALL: [Language; 6] = [
        Language::Go,
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Rust,
        Language::Json,
    ];

    /// Dispatch by file extension. Returns `None` for unknown extensions.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "go" => Some(Language::Go),
            "py" => Some(Language::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Language::JavaScript),
            "ts" | "tsx" => Some(Language::TypeScript),
            "rs" => Some(Language::Rust),
            "json" => Some(Language::Json),
            _ => None,
        }
    }

    /// Parse a language tag as it appears in a topology document.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "go" => Ok(Language::Go),
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            "typescript" => Ok(Language::TypeScript),
            "rust" => Ok(Language::Rust),
            "json" => Ok(Language::Json),
            other => Err(ProjectionError::Language(other.to_string())),
        }
    }

    /// Canonical lowercase name (also the namespace directory for
    /// mixed-language ingestion).
    pub fn name(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Json => "json",
        }
    }

    /// The compiled tree-sitter grammar.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Json => tree_sitter_json::LANGUAGE.into(),
        }
    }

    /// Named AST kinds that carry both a `name` and a `body` field and are
    /// therefore projectable as definition directories.
    pub fn definition_kinds(&self) -> &'static [&'static str] {
        match self {
            Language::Go => &["function_declaration", "method_declaration", "type_declaration"],
            Language::Python => &["function_definition", "class_definition"],
            Language::JavaScript => &["function_declaration", "class_declaration", "method_definition"],
            Language::TypeScript => &[
                "function_declaration",
                "class_declaration",
                "method_definition",
                "interface_declaration",
            ],
            Language::Rust => &["function_item", "struct_item", "enum_item", "impl_item"],
            Language::Json => &[],
        }
    }

    /// Tree-sitter selector matching definitions of `kind` with `@name`,
    /// `@body`, and `@def` captures. Field names differ per grammar, so
    /// the queries are spelled out instead of synthesized.
    pub fn definition_query(&self, kind: &str) -> Option<&'static str> {
        match (self, kind) {
            (Language::Go, "function_declaration") => {
                Some("(function_declaration name: (identifier) @name body: (block) @body) @def")
            }
            (Language::Go, "method_declaration") => {
                Some("(method_declaration name: (field_identifier) @name body: (block) @body) @def")
            }
            (Language::Go, "type_declaration") => Some(
                "(type_declaration (type_spec name: (type_identifier) @name type: (_) @body)) @def",
            ),
            (Language::Python, "function_definition") => {
                Some("(function_definition name: (identifier) @name body: (block) @body) @def")
            }
            (Language::Python, "class_definition") => {
                Some("(class_definition name: (identifier) @name body: (block) @body) @def")
            }
            (Language::JavaScript, "function_declaration")
            | (Language::TypeScript, "function_declaration") => Some(
                "(function_declaration name: (identifier) @name body: (statement_block) @body) @def",
            ),
            (Language::JavaScript, "class_declaration")
            | (Language::TypeScript, "class_declaration") => {
                Some("(class_declaration name: (identifier) @name body: (class_body) @body) @def")
            }
            (Language::JavaScript, "method_definition")
            | (Language::TypeScript, "method_definition") => Some(
                "(method_definition name: (property_identifier) @name body: (statement_block) @body) @def",
            ),
            (Language::TypeScript, "interface_declaration") => Some(
                "(interface_declaration name: (type_identifier) @name body: (interface_body) @body) @def",
            ),
            (Language::Rust, "function_item") => {
                Some("(function_item name: (identifier) @name body: (block) @body) @def")
            }
            (Language::Rust, "struct_item") => Some(
                "(struct_item name: (type_identifier) @name body: (field_declaration_list) @body) @def",
            ),
            (Language::Rust, "enum_item") => Some(
                "(enum_item name: (type_identifier) @name body: (enum_variant_list) @body) @def",
            ),
            (Language::Rust, "impl_item") => Some(
                "(impl_item type: (type_identifier) @name body: (declaration_list) @body) @def",
            ),
            _ => None,
        }
    }

    /// Whether `parent_kind` nests `child_kind` in this language's
    /// projection (e.g. Python classes nest their methods). Unknown
    /// combinations default to flat.
    pub fn nests(&self, parent_kind: &str, child_kind: &str) -> bool {
        match self {
            Language::Python => {
                parent_kind == "class_definition" && child_kind == "function_definition"
            }
            Language::JavaScript | Language::TypeScript => {
                parent_kind == "class_declaration" && child_kind == "method_definition"
            }
            Language::Rust => parent_kind == "impl_item" && child_kind == "function_item",
            Language::Go | Language::Json => false,
        }
    }

    /// Plural directory name grouping definitions of `kind`
    /// (e.g. `function_declaration` → `functions`).
    pub fn group_name(kind: &str) -> &'static str {
        match kind {
            "function_declaration" | "function_definition" | "function_item" => "functions",
            "method_declaration" | "method_definition" => "methods",
            "class_definition" | "class_declaration" => "classes",
            "type_declaration" | "struct_item" | "interface_declaration" => "types",
            "enum_item" => "enums",
            "impl_item" => "impls",
            _ => "nodes",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_dispatch() {
        assert_eq!(Language::from_extension("go"), Some(Language::Go));
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("json"), Some(Language::Json));
        assert_eq!(Language::from_extension("toml"), None);
    }

    #[test]
    fn test_json_has_no_definition_kinds() {
        assert!(Language::Json.definition_kinds().is_empty());
        assert!(!Language::Json.nests("object", "pair"));
    }

    #[test]
    fn test_name_roundtrip() {
        for lang in Language::ALL {
            assert_eq!(Language::from_name(lang.name()).unwrap(), lang);
        }
        assert!(Language::from_name("cobol").is_err());
    }

    #[test]
    fn test_python_nesting_rule() {
        assert!(Language::Python.nests("class_definition", "function_definition"));
        assert!(!Language::Python.nests("function_definition", "class_definition"));
        assert!(!Language::Go.nests("type_declaration", "function_declaration"));
    }

    #[test]
    fn test_group_names() {
        assert_eq!(Language::group_name("function_declaration"), "functions");
        assert_eq!(Language::group_name("class_definition"), "classes");
        assert_eq!(Language::group_name("mystery_kind"), "nodes");
    }

    #[test]
    fn test_definition_queries_compile() {
        for lang in Language::ALL {
            let grammar = lang.grammar();
            for kind in lang.definition_kinds() {
                let query = lang
                    .definition_query(kind)
                    .unwrap_or_else(|| panic!("no query for {} {kind}", lang.name()));
                tree_sitter::Query::new(&grammar, query)
                    .unwrap_or_else(|e| panic!("bad query for {} {kind}: {e}", lang.name()));
            }
        }
    }

    #[test]
    fn test_grammars_load() {
        for lang in Language::ALL {
            // Constructing the grammar must not panic and must expose kinds.
            let grammar = lang.grammar();
            assert!(grammar.node_kind_count() > 0, "{}", lang.name());
        }
    }
}
