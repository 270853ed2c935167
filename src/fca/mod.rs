//! Formal Concept Analysis.
//!
//! A formal context is built from sampled records (one object per record,
//! one attribute per derived boolean property); Ganter's NextClosure
//! enumerates its concept lattice in lectic order. The schema inferrer
//! reads the top concept's intent off the lattice to find the fields
//! shared by every record.

pub mod attributes;
pub mod context;
pub mod lattice;

pub use attributes::{build_context, Attribute};
pub use context::{BitSet, FormalContext};
pub use lattice::{enumerate_concepts, Concept, DEFAULT_CONCEPT_CAP};
