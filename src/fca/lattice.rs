//! Concept enumeration via Ganter's NextClosure.
//!
//! Concepts are produced in lectic order of their intents. Complexity is
//! `O(|concepts| · |M| · |G|)`; a safety cap bounds pathological
//! contexts (the lattice can be exponential in the worst case).

use tracing::warn;

use crate::fca::context::{BitSet, FormalContext};

/// Default cap on enumerated concepts.
pub const DEFAULT_CONCEPT_CAP: usize = 10_000;

/// A formal concept: a maximal `(extent, intent)` pair closed under the
/// derivation operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    pub extent: BitSet,
    pub intent: BitSet,
}

impl Concept {
    fn from_intent(ctx: &FormalContext, intent: BitSet) -> Self {
        let extent = ctx.extent(&intent);
        Self { extent, intent }
    }
}

/// Enumerate all concepts of `ctx` in lectic order of intents.
///
/// Starts from `closure(∅)` and repeatedly applies the NextClosure step:
/// scan attributes high to low, skip members of the current intent, and
/// accept the first candidate closure that passes the canonicity test.
/// Stops at the full attribute set or at `cap` concepts, whichever comes
/// first (the cap logs a warning and returns the prefix).
pub fn enumerate_concepts(ctx: &FormalContext, cap: usize) -> Vec<Concept> {
    let m = ctx.attribute_count();
    let mut concepts = Vec::new();

    let mut intent = ctx.closure(&BitSet::empty(m));
    concepts.push(Concept::from_intent(ctx, intent.clone()));

    while intent.count() < m {
        if concepts.len() >= cap {
            warn!(cap, "concept cap reached, lattice truncated");
            break;
        }
        let mut advanced = false;
        for i in (0..m).rev() {
            if intent.contains(i) {
                continue;
            }
            let mut candidate = intent.below(i);
            candidate.insert(i);
            let closed = ctx.closure(&candidate);
            // Canonicity: the closure must introduce nothing below i.
            if closed.below(i) == intent.below(i) {
                intent = closed;
                concepts.push(Concept::from_intent(ctx, intent.clone()));
                advanced = true;
                break;
            }
        }
        if !advanced {
            break;
        }
    }
    concepts
}

/// The concept with the largest extent (the lattice top). With a
/// non-empty context this is the first concept in lectic order; kept as
/// an explicit scan for robustness against truncated enumerations.
pub fn top_concept(concepts: &[Concept]) -> Option<&Concept> {
    concepts.iter().max_by_key(|c| c.extent.count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> FormalContext {
        // Objects: 4 records; attributes: a, b, c.
        let mut ctx = FormalContext::new(4, vec!["a".into(), "b".into(), "c".into()]);
        // All objects have a; half have b; one has c.
        for o in 0..4 {
            ctx.set(o, 0);
        }
        ctx.set(0, 1);
        ctx.set(1, 1);
        ctx.set(0, 2);
        ctx
    }

    #[test]
    fn test_all_concepts_are_closed() {
        let ctx = sample_context();
        for concept in enumerate_concepts(&ctx, DEFAULT_CONCEPT_CAP) {
            assert_eq!(ctx.extent(&concept.intent), concept.extent);
            assert_eq!(ctx.intent(&concept.extent), concept.intent);
        }
    }

    #[test]
    fn test_lectic_order_intents_strictly_increase() {
        let ctx = sample_context();
        let concepts = enumerate_concepts(&ctx, DEFAULT_CONCEPT_CAP);
        // Lectic order is a strict total order: no duplicate intents.
        for pair in concepts.windows(2) {
            assert_ne!(pair[0].intent, pair[1].intent);
        }
    }

    #[test]
    fn test_enumeration_terminates_at_full_intent() {
        let ctx = sample_context();
        let concepts = enumerate_concepts(&ctx, DEFAULT_CONCEPT_CAP);
        let last = concepts.last().unwrap();
        assert_eq!(last.intent.count(), ctx.attribute_count());
    }

    #[test]
    fn test_top_concept_has_universal_intent() {
        let ctx = sample_context();
        let concepts = enumerate_concepts(&ctx, DEFAULT_CONCEPT_CAP);
        let top = top_concept(&concepts).unwrap();
        assert_eq!(top.extent.count(), 4);
        // Only "a" is universal.
        assert_eq!(top.intent.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_concept_count_for_known_lattice() {
        // The sample context's lattice: {}, {a}, {a,b}, {a,b,c} closures.
        let ctx = sample_context();
        let concepts = enumerate_concepts(&ctx, DEFAULT_CONCEPT_CAP);
        assert_eq!(concepts.len(), 3);
    }

    #[test]
    fn test_cap_truncates() {
        // Contranominal scale: n objects, n attributes, incidence i != j.
        // Lattice size is 2^n; the cap must kick in.
        let n = 12;
        let names = (0..n).map(|i| format!("m{i}")).collect();
        let mut ctx = FormalContext::new(n, names);
        for o in 0..n {
            for a in 0..n {
                if o != a {
                    ctx.set(o, a);
                }
            }
        }
        let concepts = enumerate_concepts(&ctx, 100);
        assert_eq!(concepts.len(), 100);
    }

    #[test]
    fn test_empty_context() {
        let ctx = FormalContext::new(0, vec!["a".into()]);
        let concepts = enumerate_concepts(&ctx, DEFAULT_CONCEPT_CAP);
        // Every attribute is vacuously universal.
        assert_eq!(concepts.len(), 1);
        assert_eq!(concepts[0].intent.count(), 1);
    }
}
