//! Greedy entropy partitioning for heterogeneous JSON records.
//!
//! Recursive depth-first partitioning: at every level, pick the
//! attribute whose partition best separates record *shapes* (schema
//! signatures), with hint boosts for temporal fields. When no attribute
//! scores above the split threshold the level becomes a leaf directory
//! per record.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::fca::attributes::{collect_field_stats, entropy, is_date_like, FieldStats};
use crate::infer::InferOptions;
use crate::record::{value_to_text, Record};
use crate::topology::{LeafFile, NodeDef, Topology};

/// How a candidate attribute partitions records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PartitionKind {
    /// Partition by exact value.
    Value,
    /// Partition by the `YYYY` slice of a date-like field.
    Year,
    /// Partition by the `MM` slice of a date-like field.
    Month,
}

#[derive(Debug, Clone)]
struct Candidate {
    field: String,
    kind: PartitionKind,
    score: f64,
    /// Records the field is present in (tie-break: higher wins).
    support: usize,
    partitions: BTreeMap<String, Vec<usize>>,
}

/// Greedy projection entry point.
pub fn project(records: &[Record], root_name: &str, opts: &InferOptions) -> Result<Topology> {
    let indices: Vec<usize> = (0..records.len()).collect();
    let children = partition_level(records, &indices, 0, opts);
    Ok(Topology::new(vec![
        NodeDef::new(root_name, "$").with_children(children)
    ]))
}

fn partition_level(
    records: &[Record],
    indices: &[usize],
    depth: usize,
    opts: &InferOptions,
) -> Vec<NodeDef> {
    if depth >= opts.max_depth || indices.len() < opts.min_split {
        return vec![leaf_node(records, indices)];
    }

    let subset: Vec<&Record> = indices.iter().map(|&i| &records[i]).collect();
    let stats = collect_stats(&subset);
    let signatures: Vec<String> = subset.iter().map(|r| schema_signature(r)).collect();
    let base_entropy = signature_entropy(signatures.iter());

    let best = candidates(&subset, &stats, &signatures, base_entropy, opts)
        .into_iter()
        .max_by(compare_candidates);

    match best {
        Some(candidate) if candidate.score >= opts.split_threshold => {
            let mut children = Vec::new();
            for (key, local_indices) in &candidate.partitions {
                let global: Vec<usize> =
                    local_indices.iter().map(|&i| indices[i]).collect();
                let selector = partition_selector(&candidate, key);
                let child = NodeDef::new(key.clone(), selector)
                    .with_children(partition_level(records, &global, depth + 1, opts));
                children.push(child);
            }
            children
        }
        _ => vec![leaf_node(records, indices)],
    }
}

fn collect_stats(subset: &[&Record]) -> BTreeMap<String, FieldStats> {
    let owned: Vec<Record> = subset.iter().map(|r| (*r).clone()).collect();
    collect_field_stats(&owned)
}

/// Sorted list of leaf field paths — the record's *shape*.
fn schema_signature(record: &Record) -> String {
    let paths: Vec<String> = record.leaf_fields().into_keys().collect();
    paths.join(";")
}

fn signature_entropy<'a>(signatures: impl Iterator<Item = &'a String>) -> f64 {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for sig in signatures {
        *counts.entry(sig.as_str()).or_insert(0) += 1;
    }
    let values: Vec<usize> = counts.values().copied().collect();
    entropy(values.iter())
}

/// A field name that hints identity or cross-reference; excluded from
/// partitioning (directories of unique values are useless).
fn is_identifier_hint(field: &str) -> bool {
    let segment = field.rsplit('.').next().unwrap_or(field).to_ascii_lowercase();
    segment == "id"
        || segment == "identifier"
        || segment.ends_with("_id")
        || segment.ends_with("id") && segment.len() <= 6
        || segment.contains("reference")
        || segment == "ref"
}

fn candidates(
    subset: &[&Record],
    stats: &BTreeMap<String, FieldStats>,
    signatures: &[String],
    base_entropy: f64,
    opts: &InferOptions,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (field, stat) in stats {
        if is_identifier_hint(field) || stat.cardinality_ratio() > opts.id_ratio {
            continue;
        }
        let date = stat.is_date_like();
        let kinds: &[PartitionKind] = if date {
            &[PartitionKind::Value, PartitionKind::Year, PartitionKind::Month]
        } else {
            &[PartitionKind::Value]
        };
        for &kind in kinds {
            let partitions = partition_by(subset, field, kind);
            if partitions.len() < 2 {
                continue;
            }

            let total = subset.len() as f64;
            let weighted: f64 = partitions
                .values()
                .map(|members| {
                    let part_sigs = members.iter().map(|&i| &signatures[i]);
                    (members.len() as f64 / total) * signature_entropy(part_sigs)
                })
                .sum();
            let structural_gain = base_entropy - weighted;

            let mut score = structural_gain;
            if structural_gain < opts.gain_floor {
                score += stat.intrinsic_entropy() * 0.1;
            }
            if date && stat.intrinsic_entropy() > 0.0 {
                score += 10.0;
            }
            match kind {
                PartitionKind::Year => score += 3.0,
                PartitionKind::Month => score += 2.0,
                PartitionKind::Value => {}
            }

            out.push(Candidate {
                field: field.clone(),
                kind,
                score,
                support: stat.count,
                partitions,
            });
        }
    }
    out
}

/// Deterministic tie-break: score, then higher support, then fewer
/// partitions, then lexicographic field name (reversed: `max_by` keeps
/// the greatest, so smaller names must compare greater).
fn compare_candidates(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.support.cmp(&b.support))
        .then(b.partitions.len().cmp(&a.partitions.len()))
        .then(b.field.cmp(&a.field))
        .then(b.kind.cmp(&a.kind))
}

fn partition_by(
    subset: &[&Record],
    field: &str,
    kind: PartitionKind,
) -> BTreeMap<String, Vec<usize>> {
    let mut out: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, record) in subset.iter().enumerate() {
        let Some(value) = record.get_field(field) else {
            continue;
        };
        let text = value_to_text(&value);
        let key = match kind {
            PartitionKind::Value => Some(text),
            PartitionKind::Year if is_date_like(&text) => Some(text[0..4].to_string()),
            PartitionKind::Month if is_date_like(&text) => Some(text[5..7].to_string()),
            _ => None,
        };
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            out.entry(key).or_default().push(i);
        }
    }
    out
}

/// Selector expressing the partition predicate in the JSON dialect:
/// `?field=value` for value partitions, `?field@a..b=value` for slices.
fn partition_selector(candidate: &Candidate, key: &str) -> String {
    match candidate.kind {
        PartitionKind::Value => format!("?{}={}", candidate.field, key),
        PartitionKind::Year => format!("?{}@0..4={}", candidate.field, key),
        PartitionKind::Month => format!("?{}@5..7={}", candidate.field, key),
    }
}

/// Terminal level: an identifier-named directory per record with its
/// common scalar fields as leaf files plus `raw.json`.
fn leaf_node(records: &[Record], indices: &[usize]) -> NodeDef {
    let subset: Vec<&Record> = indices.iter().map(|&i| &records[i]).collect();
    let stats = collect_stats(&subset);

    // Prefer an explicitly id-hinted string field, else the most
    // distinct string field.
    let identifier = stats
        .values()
        .filter(|s| s.is_string())
        .max_by_key(|s| (is_identifier_hint(&s.path), s.distinct()))
        .map(|s| s.path.clone())
        .unwrap_or_else(|| "record".to_string());

    let majority = subset.len().div_ceil(2);
    let mut files: Vec<LeafFile> = stats
        .values()
        .filter(|s| s.path != identifier && s.count >= majority)
        .map(|s| {
            LeafFile::new(
                s.path.rsplit('.').next().unwrap_or(&s.path).to_string(),
                format!("{{{{.{path}}}}}", path = s.path),
            )
        })
        .collect();
    files.push(LeafFile::new("raw.json", "{{. | json}}"));

    NodeDef::new(
        format!("{{{{.{identifier}}}}}", identifier = identifier),
        "$[*]",
    )
    .with_files(files)
}
