//! FCA projection: homogeneous record sets with a universal identifier.
//!
//! The top concept's intent gives the attributes shared by every record.
//! The projection picks an identifier among them, optionally shards by a
//! date field (year, then month), and turns the remaining universal
//! fields into leaf files next to `raw.json`.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::fca::attributes::{build_context, collect_field_stats, FieldStats};
use crate::fca::lattice::{enumerate_concepts, top_concept};
use crate::fca::Attribute;
use crate::infer::InferOptions;
use crate::record::Record;
use crate::topology::{LeafFile, NodeDef, Topology};

/// Attempt the FCA projection. Returns `None` when the sample has no
/// universal string identifier (the greedy projection handles those).
pub fn project(
    records: &[Record],
    root_name: &str,
    opts: &InferOptions,
) -> Result<Option<Topology>> {
    if records.is_empty() {
        return Ok(None);
    }

    let (ctx, attributes) = build_context(records);
    let concepts = enumerate_concepts(&ctx, opts.concept_cap);
    let Some(top) = top_concept(&concepts) else {
        return Ok(None);
    };

    // Universal fields: presence attributes in the top intent.
    let universal: BTreeSet<String> = top
        .intent
        .iter()
        .filter_map(|i| match &attributes[i] {
            Attribute::Presence { field } => Some(field.clone()),
            _ => None,
        })
        .collect();

    let stats = collect_field_stats(records);

    // Identifier: universal string field, not date-like, with the
    // highest distinct-value count. BTreeSet order breaks ties.
    let identifier = universal
        .iter()
        .filter_map(|field| stats.get(field))
        .filter(|s| s.is_string() && !s.is_date_like())
        .max_by_key(|s| s.distinct())
        .map(|s| s.path.clone());
    let Some(identifier) = identifier else {
        return Ok(None);
    };

    // At most one date field shards the tree.
    let shard_field = universal
        .iter()
        .filter_map(|field| stats.get(field))
        .filter(|s| s.is_date_like())
        .max_by_key(|s| (s.distinct_years().len(), std::cmp::Reverse(s.path.clone())))
        .map(|s| s.path.clone());

    let leaf = leaf_node(&identifier, &universal, &stats, "$[*]");
    let tree = match shard_field.as_deref().map(|f| shard_levels(f, &stats)) {
        Some((field, true, want_month)) => {
            let inner = leaf_node(&identifier, &universal, &stats, ".");
            let inner = if want_month {
                NodeDef::new(format!("{{{{slice .{field} 5 7}}}}", field = field), ".")
                    .with_children(vec![inner])
            } else {
                inner
            };
            NodeDef::new(format!("{{{{slice .{field} 0 4}}}}", field = field), "$[*]")
                .with_children(vec![inner])
        }
        _ => leaf,
    };

    Ok(Some(Topology::new(vec![
        NodeDef::new(root_name, "$").with_children(vec![tree])
    ])))
}

/// Shard decision for a date field: `(field, year_level, month_level)`.
fn shard_levels<'a>(
    field: &'a str,
    stats: &std::collections::BTreeMap<String, FieldStats>,
) -> (&'a str, bool, bool) {
    let Some(stat) = stats.get(field) else {
        return (field, false, false);
    };
    let years = stat.distinct_years().len();
    let months = stat.distinct_months().len();
    (field, years >= 2, years >= 2 && months >= 2)
}

/// The innermost per-record directory: identifier-named, carrying one
/// leaf file per remaining universal field plus `raw.json`.
fn leaf_node(
    identifier: &str,
    universal: &BTreeSet<String>,
    stats: &std::collections::BTreeMap<String, FieldStats>,
    selector: &str,
) -> NodeDef {
    let mut files: Vec<LeafFile> = universal
        .iter()
        .filter(|field| field.as_str() != identifier)
        .filter(|field| {
            // Shard fields keep their leaf file too; only compound
            // values (arrays) are unreadable as single-line files.
            stats.get(*field).is_some()
        })
        .map(|field| {
            LeafFile::new(
                leaf_file_name(field),
                format!("{{{{.{field}}}}}", field = field),
            )
        })
        .collect();
    files.push(LeafFile::new("raw.json", "{{. | json}}"));

    NodeDef::new(
        format!("{{{{.{identifier}}}}}", identifier = identifier),
        selector,
    )
    .with_files(files)
}

/// Last path segment, so `item.vendorProject` files read as
/// `vendorProject`.
fn leaf_file_name(field: &str) -> String {
    field.rsplit('.').next().unwrap_or(field).to_string()
}
