//! Ingestion engine: walk a data source, parse it, and materialize
//! graph nodes per the topology.
//!
//! Dispatch is by source shape:
//!
//! | Source            | Handling                                   |
//! |-------------------|--------------------------------------------|
//! | `.json` file      | one record or array-of-records             |
//! | source tree       | tree-sitter per language, parallel parsing |
//! | `.db` image       | direct attach — no ingestion               |
//! | `.git` history    | commit records from the external loader    |

pub mod json;
pub mod materialize;
pub mod treesitter;

pub use materialize::{IngestStats, Materializer, SourceFile};

use std::path::Path;

use ignore::WalkBuilder;
use tracing::info;

use crate::error::{ProjectionError, Result};
use crate::graph::NodeSink;
use crate::lang::{CallExtractor, Language};
use crate::record::{CommitRecord, Record};
use crate::topology::Topology;

/// What kind of source a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    JsonFile,
    SourceTree,
    DbImage,
    GitHistory,
}

/// Classify a source path.
pub fn detect_source(path: &Path) -> SourceKind {
    if path.is_dir() {
        if path.extension().is_some_and(|e| e == "git")
            || path.file_name().is_some_and(|n| n == ".git")
        {
            return SourceKind::GitHistory;
        }
        return SourceKind::SourceTree;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("db") => SourceKind::DbImage,
        Some("git") => SourceKind::GitHistory,
        _ => SourceKind::JsonFile,
    }
}

/// Gitignore-aware walk collecting parseable source files.
pub fn collect_source_files(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for entry in WalkBuilder::new(root).hidden(true).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "walk error, skipping entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(language) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
        else {
            continue;
        };
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        files.push(SourceFile {
            path: path.to_path_buf(),
            text,
            language,
            mtime,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Definition records from every parseable file, for schema inference
/// over source trees.
pub fn scan_tree_definitions(root: &Path) -> Result<Vec<Record>> {
    let files = collect_source_files(root)?;
    let mut records = Vec::new();
    for file in &files {
        match treesitter::scan_definitions(&file.text, &file.path, file.language) {
            Ok(found) => records.extend(found.into_iter().map(Record::Ast)),
            Err(e) => {
                tracing::warn!(file = %file.path.display(), error = %e, "definition scan failed")
            }
        }
    }
    Ok(records)
}

/// The ingestion driver: a topology plus the collaborator seams.
pub struct Ingestor<'a> {
    topology: &'a Topology,
    extractor: &'a dyn CallExtractor,
}

impl<'a> Ingestor<'a> {
    pub fn new(topology: &'a Topology, extractor: &'a dyn CallExtractor) -> Self {
        Self {
            topology,
            extractor,
        }
    }

    /// Ingest a source path into the sink.
    pub fn ingest(&self, source: &Path, sink: &mut dyn NodeSink) -> Result<IngestStats> {
        let stats = match detect_source(source) {
            SourceKind::JsonFile => {
                let records = json::load_records(source)?;
                self.ingest_records(&records, sink)?
            }
            SourceKind::SourceTree => {
                let files = collect_source_files(source)?;
                Materializer::new(self.topology, self.extractor).materialize_tree(files, sink)?
            }
            SourceKind::DbImage => {
                return Err(ProjectionError::InvalidTopology(
                    "db images are attached directly, not ingested".into(),
                ))
            }
            SourceKind::GitHistory => {
                return Err(ProjectionError::InvalidTopology(
                    "git history records come from the external loader; \
                     use ingest_commits"
                        .into(),
                ))
            }
        };
        info!(
            directories = stats.directories,
            files = stats.files,
            refs = stats.refs,
            parse_errors = stats.parse_errors,
            "ingestion complete"
        );
        Ok(stats)
    }

    /// Ingest pre-loaded records (JSON values, commit records).
    pub fn ingest_records(
        &self,
        records: &[Record],
        sink: &mut dyn NodeSink,
    ) -> Result<IngestStats> {
        Materializer::new(self.topology, self.extractor).materialize_records(records, sink)
    }

    /// Ingest commit records produced by the external history loader.
    pub fn ingest_commits(
        &self,
        commits: Vec<CommitRecord>,
        sink: &mut dyn NodeSink,
    ) -> Result<IngestStats> {
        let records: Vec<Record> = commits.into_iter().map(Record::Commit).collect();
        self.ingest_records(&records, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraph, NodeStore};
    use crate::lang::IdentifierExtractor;
    use crate::topology::{LeafFile, NodeDef};
    use tempfile::TempDir;

    #[test]
    fn test_detect_source() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_source(dir.path()), SourceKind::SourceTree);
        assert_eq!(
            detect_source(Path::new("records.json")),
            SourceKind::JsonFile
        );
        assert_eq!(detect_source(Path::new("index.db")), SourceKind::DbImage);
        let git = dir.path().join(".git");
        std::fs::create_dir(&git).unwrap();
        assert_eq!(detect_source(&git), SourceKind::GitHistory);
    }

    #[test]
    fn test_collect_source_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.go"), "package b\n").unwrap();
        std::fs::write(dir.path().join("a.go"), "package a\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let files = collect_source_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.go", "b.go"]);
        assert!(files.iter().all(|f| f.language == Language::Go));
    }

    #[test]
    fn test_ingest_json_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("records.json");
        std::fs::write(
            &source,
            r#"[{"id": "one", "v": 1}, {"id": "two", "v": 2}]"#,
        )
        .unwrap();

        let topology = Topology::new(vec![NodeDef::new("records", "$").with_children(vec![
            NodeDef::new("{{.id}}", "$[*]")
                .with_files(vec![LeafFile::new("raw.json", "{{. | json}}")]),
        ])]);
        let extractor = IdentifierExtractor;
        let ingestor = Ingestor::new(&topology, &extractor);
        let mut graph = MemoryGraph::new();
        let stats = ingestor.ingest(&source, &mut graph).unwrap();
        assert_eq!(stats.files, 2);
        assert!(graph.get_node("records/one/raw.json").is_ok());
    }

    #[test]
    fn test_ingest_db_image_is_rejected() {
        let topology = Topology::new(vec![NodeDef::new("x", "$")]);
        let extractor = IdentifierExtractor;
        let ingestor = Ingestor::new(&topology, &extractor);
        let mut graph = MemoryGraph::new();
        assert!(ingestor.ingest(Path::new("image.db"), &mut graph).is_err());
    }

    #[test]
    fn test_ingest_commits() {
        let topology = Topology::new(vec![NodeDef::new("commits", "$").with_children(vec![
            NodeDef::new("{{.hash}}", "$[*]").with_files(vec![
                LeafFile::new("message", "{{.message}}"),
                LeafFile::new("author", "{{.author}}"),
            ]),
        ])]);
        let extractor = IdentifierExtractor;
        let ingestor = Ingestor::new(&topology, &extractor);
        let mut graph = MemoryGraph::new();
        ingestor
            .ingest_commits(
                vec![CommitRecord {
                    hash: "abc123".into(),
                    author: "dev".into(),
                    date: "2024-01-01T00:00:00Z".into(),
                    message: "initial".into(),
                    files: vec![],
                }],
                &mut graph,
            )
            .unwrap();
        let mut buf = [0u8; 32];
        let n = graph
            .read_content("commits/abc123/message", &mut buf, 0)
            .unwrap();
        assert_eq!(&buf[..n], b"initial");
    }

    #[test]
    fn test_scan_tree_definitions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("main.go"),
            "package main\nfunc Hello() {}\n",
        )
        .unwrap();
        let records = scan_tree_definitions(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get_field("name"),
            Some(serde_json::Value::String("Hello".into()))
        );
    }
}
