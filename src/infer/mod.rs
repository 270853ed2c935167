//! Schema inference: derive a `Topology` from sampled records.
//!
//! Three strategies share one facade. AST-shaped samples (a `type`
//! attribute on most records) project per-definition-kind directory
//! trees; homogeneous JSON samples with a universal identifier use the
//! FCA projection; heterogeneous JSON falls back to greedy entropy
//! partitioning. All three are deterministic for a given seed.

pub mod ast;
pub mod fca;
pub mod greedy;
pub mod sample;

use crate::error::Result;
use crate::record::Record;
use crate::topology::Topology;

/// Strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Pick by sample shape.
    #[default]
    Auto,
    Fca,
    Greedy,
    Ast,
}

/// Inference tunables. The thresholds mirror the heuristics the
/// projections were calibrated with; all are overridable.
#[derive(Debug, Clone)]
pub struct InferOptions {
    pub strategy: Strategy,
    /// Reservoir sample size.
    pub sample_size: usize,
    /// RNG seed for sampling determinism.
    pub seed: u64,
    /// Greedy recursion depth limit.
    pub max_depth: usize,
    /// Minimum records required to split a greedy partition.
    pub min_split: usize,
    /// NextClosure safety cap.
    pub concept_cap: usize,
    /// Cardinality/count ratio above which a field is treated as an
    /// identifier and excluded from partitioning.
    pub id_ratio: f64,
    /// Structural gain below which intrinsic entropy is consulted.
    pub gain_floor: f64,
    /// Minimum score to keep partitioning instead of emitting a leaf.
    pub split_threshold: f64,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Auto,
            sample_size: 1000,
            seed: 0x4C45_5943,
            max_depth: 5,
            min_split: 10,
            concept_cap: crate::fca::DEFAULT_CONCEPT_CAP,
            id_ratio: 0.9,
            gain_floor: 0.001,
            split_threshold: 0.5,
        }
    }
}

/// Infer a topology from records. `root_name` names the projection root
/// (typically the data set's file stem).
pub fn infer_topology(
    records: &[Record],
    root_name: &str,
    opts: &InferOptions,
) -> Result<Topology> {
    let sampled = sample::reservoir(records, opts.sample_size, opts.seed);

    let topology = match opts.strategy {
        Strategy::Ast => ast::project(&sampled)?,
        Strategy::Fca => fca::project(&sampled, root_name, opts)?
            .unwrap_or_else(|| greedy_or_empty(&sampled, root_name, opts)),
        Strategy::Greedy => greedy::project(&sampled, root_name, opts)?,
        Strategy::Auto => {
            if looks_like_ast(&sampled) {
                ast::project(&sampled)?
            } else if let Some(topology) = fca::project(&sampled, root_name, opts)? {
                topology
            } else {
                greedy::project(&sampled, root_name, opts)?
            }
        }
    };
    topology.validate()?;
    Ok(topology)
}

fn greedy_or_empty(records: &[Record], root_name: &str, opts: &InferOptions) -> Topology {
    greedy::project(records, root_name, opts)
        .unwrap_or_else(|_| Topology::new(vec![crate::topology::NodeDef::new(root_name, "$")]))
}

/// AST flattenings carry `type` and `name` on (almost) every record.
fn looks_like_ast(records: &[Record]) -> bool {
    if records.is_empty() {
        return false;
    }
    let typed = records
        .iter()
        .filter(|r| r.get_field("type").is_some() && r.get_field("name").is_some())
        .count();
    typed * 2 > records.len()
}
