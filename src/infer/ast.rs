//! AST projection: records that are tree-sitter flattenings.
//!
//! For each distinct definition kind observed in the sample, emit a
//! group directory (`functions/`, `classes/`, …) holding one `{{.name}}`
//! directory per match with the definition text as its `source` file.
//! The per-language nesting table decides which kinds appear inside
//! others (Python methods under their class); unknown languages stay
//! flat. Kinds are sorted alphabetically for determinism.

use std::collections::BTreeMap;

use crate::error::{ProjectionError, Result};
use crate::lang::Language;
use crate::record::Record;
use crate::topology::{LeafFile, NodeDef, Topology};

/// Project AST-shaped records into a topology.
///
/// With multiple languages in the sample, each language's subtree is
/// wrapped under a namespace directory named after the language.
pub fn project(records: &[Record]) -> Result<Topology> {
    // kind sets per language, BTreeMap/Vec for deterministic order.
    let mut kinds_by_language: BTreeMap<Language, Vec<String>> = BTreeMap::new();
    for record in records {
        let Record::Ast(ast) = record else { continue };
        let kinds = kinds_by_language.entry(ast.language).or_default();
        if !kinds.contains(&ast.kind) {
            kinds.push(ast.kind.clone());
        }
    }
    if kinds_by_language.is_empty() {
        return Err(ProjectionError::InvalidTopology(
            "no AST records to project".into(),
        ));
    }
    for kinds in kinds_by_language.values_mut() {
        kinds.sort();
    }

    let multi = kinds_by_language.len() > 1;
    let mut nodes = Vec::new();
    for (language, kinds) in &kinds_by_language {
        let groups = language_nodes(*language, kinds);
        if multi {
            nodes.push(
                NodeDef::new(language.name(), "$").with_children(groups),
            );
        } else {
            nodes.extend(groups);
        }
    }
    Ok(Topology::new(nodes))
}

/// Top-level group nodes for one language. A kind nested under another
/// present kind is emitted inside the parent's match node instead.
fn language_nodes(language: Language, kinds: &[String]) -> Vec<NodeDef> {
    let nested: Vec<&String> = kinds
        .iter()
        .filter(|child| kinds.iter().any(|parent| language.nests(parent, child)))
        .collect();

    kinds
        .iter()
        .filter(|kind| !nested.contains(kind))
        .map(|kind| kind.as_str())
        .filter_map(|kind| group_node(language, kind, kinds))
        .collect()
}

fn group_node(language: Language, kind: &str, all_kinds: &[String]) -> Option<NodeDef> {
    let selector = language.definition_query(kind)?;

    let child_groups: Vec<NodeDef> = all_kinds
        .iter()
        .filter(|child| language.nests(kind, child))
        .filter_map(|child| group_node(language, child, &[]))
        .collect();

    let match_node = NodeDef::new("{{.name}}", selector)
        .with_language(language)
        .with_children(child_groups)
        .with_files(vec![LeafFile::new("source", "{{.body}}")]);

    Some(NodeDef::new(Language::group_name(kind), "").with_children(vec![match_node]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AstRecord;
    use std::path::PathBuf;

    fn ast(kind: &str, name: &str, language: Language) -> Record {
        Record::Ast(AstRecord {
            kind: kind.into(),
            name: name.into(),
            body: format!("{kind} {name}"),
            file: PathBuf::from("src/x"),
            start_byte: 0,
            end_byte: 10,
            language,
        })
    }

    #[test]
    fn test_go_projection_is_flat() {
        let records = vec![
            ast("function_declaration", "Hello", Language::Go),
            ast("type_declaration", "Server", Language::Go),
        ];
        let topology = project(&records).unwrap();
        let names: Vec<&str> = topology.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["functions", "types"]);

        let functions = &topology.nodes[0];
        let match_node = &functions.children()[0];
        assert_eq!(match_node.name, "{{.name}}");
        assert_eq!(match_node.language.as_deref(), Some("go"));
        assert!(match_node.selector.starts_with("(function_declaration"));
        assert_eq!(match_node.files()[0].name, "source");
        assert_eq!(match_node.files()[0].content_template, "{{.body}}");
    }

    #[test]
    fn test_python_classes_nest_functions() {
        let records = vec![
            ast("class_definition", "Handler", Language::Python),
            ast("function_definition", "run", Language::Python),
        ];
        let topology = project(&records).unwrap();
        // function_definition nests under class_definition, so only the
        // class group is top-level.
        assert_eq!(topology.nodes.len(), 1);
        assert_eq!(topology.nodes[0].name, "classes");

        let class_match = &topology.nodes[0].children()[0];
        let nested = &class_match.children()[0];
        assert_eq!(nested.name, "functions");
    }

    #[test]
    fn test_multi_language_namespacing() {
        let records = vec![
            ast("function_declaration", "Hello", Language::Go),
            ast("function_definition", "hello", Language::Python),
        ];
        let topology = project(&records).unwrap();
        let names: Vec<&str> = topology.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["go", "python"]);
    }

    #[test]
    fn test_kinds_sorted_alphabetically() {
        let records = vec![
            ast("type_declaration", "B", Language::Go),
            ast("function_declaration", "A", Language::Go),
            ast("method_declaration", "C", Language::Go),
        ];
        let topology = project(&records).unwrap();
        let names: Vec<&str> = topology.nodes.iter().map(|n| n.name.as_str()).collect();
        // function_declaration < method_declaration < type_declaration.
        assert_eq!(names, vec!["functions", "methods", "types"]);
    }

    #[test]
    fn test_no_ast_records_is_error() {
        let err = project(&[Record::Json(serde_json::json!({"a": 1}))]).unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidTopology(_)));
    }

    #[test]
    fn test_projection_validates() {
        let records = vec![ast("function_declaration", "Hello", Language::Go)];
        let topology = project(&records).unwrap();
        topology.validate().unwrap();
    }
}
