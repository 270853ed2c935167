//! Integration tests: schema inference scenarios.
//!
//! Covers flat FCA inference on KEV-like records, temporal sharding on
//! NVD-like records, and the structural invariants of the topology
//! document and the concept lattice.

use leyline::fca::{enumerate_concepts, BitSet, FormalContext};
use leyline::infer::{infer_topology, InferOptions};
use leyline::record::Record;
use leyline::topology::{NodeDef, Topology};
use proptest::prelude::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn kev_records() -> Vec<Record> {
    (0..5)
        .map(|i| {
            Record::Json(json!({
                "schema": "https://example.org/kev/1.0",
                "identifier": format!("KEV-2023-{i:04}"),
                "item": {
                    "cveID": format!("CVE-2023-{:04}", i * 7),
                    "vendorProject": format!("Vendor{}", i % 2),
                    "product": format!("Product{}", i % 3),
                }
            }))
        })
        .collect()
}

fn nvd_records() -> Vec<Record> {
    (0..10)
        .map(|i| {
            let year = 2023 + (i % 2);
            let month = i % 3 + 1;
            Record::Json(json!({
                "item": {
                    "cve": {
                        "id": format!("CVE-{year}-{i:04}"),
                        "published": format!("{year}-{month:02}-15T10:00:00"),
                    }
                }
            }))
        })
        .collect()
}

fn depth(node: &NodeDef) -> usize {
    1 + node.children().iter().map(depth).max().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Flat schema inference on KEV-like records
// ---------------------------------------------------------------------------

#[test]
fn flat_inference_on_kev_records() {
    let topology =
        infer_topology(&kev_records(), "vulns", &InferOptions::default()).unwrap();

    // One root named after the data set.
    assert_eq!(topology.nodes.len(), 1);
    let root = &topology.nodes[0];
    assert_eq!(root.name, "vulns");

    // Tree depth ≤ 3.
    assert!(depth(root) <= 3, "tree depth {} > 3", depth(root));

    // The innermost node references a high-cardinality universal string
    // field by template.
    let inner = &root.children()[0];
    assert!(inner.name.starts_with("{{.") && inner.name.ends_with("}}"));
    assert!(
        inner.name.contains("identifier") || inner.name.contains("cveID"),
        "unexpected identifier template: {}",
        inner.name
    );

    // Files include raw.json with the whole-record template.
    let raw = inner
        .files()
        .iter()
        .find(|f| f.name == "raw.json")
        .expect("raw.json leaf");
    assert_eq!(raw.content_template, "{{. | json}}");
}

// ---------------------------------------------------------------------------
// Temporal sharding on NVD-like records
// ---------------------------------------------------------------------------

#[test]
fn temporal_sharding_year_month_identifier() {
    let topology =
        infer_topology(&nvd_records(), "nvd", &InferOptions::default()).unwrap();

    let root = &topology.nodes[0];
    let year = &root.children()[0];
    let month = &year.children()[0];
    let ident = &month.children()[0];

    // Year slices [0..4], month slices [5..7] of the date field.
    assert_eq!(year.name, "{{slice .item.cve.published 0 4}}");
    assert_eq!(month.name, "{{slice .item.cve.published 5 7}}");
    assert_eq!(ident.name, "{{.item.cve.id}}");
    assert!(ident.files().iter().any(|f| f.name == "raw.json"));
}

#[test]
fn temporal_sharding_requires_two_years() {
    // Same records squeezed into one year: no year directory.
    let records: Vec<Record> = (0..10)
        .map(|i| {
            Record::Json(json!({
                "item": {
                    "cve": {
                        "id": format!("CVE-2023-{i:04}"),
                        "published": format!("2023-{:02}-15", i % 3 + 1),
                    }
                }
            }))
        })
        .collect();
    let topology = infer_topology(&records, "nvd", &InferOptions::default()).unwrap();
    let inner = &topology.nodes[0].children()[0];
    assert_eq!(inner.name, "{{.item.cve.id}}");
}

// ---------------------------------------------------------------------------
// Topology JSON round-trip
// ---------------------------------------------------------------------------

#[test]
fn inferred_topologies_roundtrip_exactly() {
    for (records, name) in [(kev_records(), "vulns"), (nvd_records(), "nvd")] {
        let topology = infer_topology(&records, name, &InferOptions::default()).unwrap();
        let rendered = topology.to_json().unwrap();
        let parsed = Topology::from_json(&rendered).unwrap();
        assert_eq!(parsed, topology);
        assert_eq!(parsed.to_json().unwrap(), rendered);
    }
}

proptest! {
    #[test]
    fn arbitrary_topologies_roundtrip(
        names in proptest::collection::vec("[a-z]{1,8}", 1..5),
        selectors in proptest::collection::vec(prop_oneof![
            Just("$".to_string()),
            Just("$[*]".to_string()),
            "[a-z]{1,6}".prop_map(|f| format!("?{f}=x")),
        ], 1..5),
    ) {
        let nodes: Vec<NodeDef> = names
            .iter()
            .zip(selectors.iter().cycle())
            .map(|(name, selector)| NodeDef::new(name.clone(), selector.clone()))
            .collect();
        let topology = Topology::new(nodes);
        let rendered = topology.to_json().unwrap();
        let parsed = Topology::from_json(&rendered).unwrap();
        prop_assert_eq!(parsed, topology);
    }
}

// ---------------------------------------------------------------------------
// NextClosure produces closed concepts in lectic order
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn nextclosure_concepts_are_closed_and_unique(
        incidence in proptest::collection::vec(
            proptest::collection::vec(any::<bool>(), 5), 1..8),
    ) {
        let attrs = (0..5).map(|i| format!("m{i}")).collect();
        let mut ctx = FormalContext::new(incidence.len(), attrs);
        for (object, row) in incidence.iter().enumerate() {
            for (attribute, &set) in row.iter().enumerate() {
                if set {
                    ctx.set(object, attribute);
                }
            }
        }

        let concepts = enumerate_concepts(&ctx, 10_000);
        prop_assert!(!concepts.is_empty());

        let mut seen = std::collections::HashSet::new();
        for concept in &concepts {
            // (A, B) with A' = B and B' = A.
            prop_assert_eq!(&ctx.intent(&concept.extent), &concept.intent);
            prop_assert_eq!(&ctx.extent(&concept.intent), &concept.extent);
            // Lectic order never repeats an intent.
            let intent: Vec<usize> = concept.intent.iter().collect();
            prop_assert!(seen.insert(intent));
        }

        // The enumeration starts at closure(∅) and ends at the full
        // attribute set.
        let bottom = ctx.closure(&BitSet::empty(5));
        prop_assert_eq!(&concepts[0].intent, &bottom);
        prop_assert_eq!(concepts.last().unwrap().intent.count(), 5);
    }
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn inference_is_deterministic_across_runs() {
    let records: Vec<Record> = (0..200)
        .map(|i| {
            Record::Json(json!({
                "name": format!("record-{i}"),
                "group": format!("g{}", i % 4),
                "created": format!("202{}-{:02}-01", i % 3, i % 12 + 1),
            }))
        })
        .collect();
    let opts = InferOptions {
        sample_size: 50,
        ..InferOptions::default()
    };
    let first = infer_topology(&records, "data", &opts).unwrap();
    for _ in 0..3 {
        assert_eq!(infer_topology(&records, "data", &opts).unwrap(), first);
    }
}
