//! Seeded reservoir sampling.
//!
//! Inference runs on a bounded sample so pathological inputs can't blow
//! up the lattice; the seeded RNG keeps the sample — and therefore the
//! inferred topology — reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::record::Record;

/// Algorithm R over the record slice. Returns all records (cloned, in
/// order) when the input fits the reservoir.
pub fn reservoir(records: &[Record], size: usize, seed: u64) -> Vec<Record> {
    if records.len() <= size {
        return records.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out: Vec<Record> = records[..size].to_vec();
    for (i, record) in records.iter().enumerate().skip(size) {
        let j = rng.gen_range(0..=i);
        if j < size {
            out[j] = record.clone();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::Json(json!({"i": i}))).collect()
    }

    #[test]
    fn test_small_input_passes_through() {
        let input = records(5);
        let out = reservoir(&input, 10, 42);
        assert_eq!(out, input);
    }

    #[test]
    fn test_sample_size_honored() {
        let out = reservoir(&records(500), 100, 42);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_same_seed_same_sample() {
        let input = records(500);
        assert_eq!(reservoir(&input, 50, 7), reservoir(&input, 50, 7));
    }

    #[test]
    fn test_different_seed_different_sample() {
        let input = records(500);
        assert_ne!(reservoir(&input, 50, 7), reservoir(&input, 50, 8));
    }

    #[test]
    fn test_sample_draws_from_whole_input() {
        let out = reservoir(&records(1000), 100, 42);
        // With 1000 inputs and a fair reservoir, some element past the
        // initial fill must have been selected.
        let has_tail = out.iter().any(|r| {
            r.get_field("i")
                .and_then(|v| v.as_u64())
                .is_some_and(|i| i >= 100)
        });
        assert!(has_tail);
    }
}
