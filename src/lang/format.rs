//! Formatter and linter seams for the write-back pipeline.
//!
//! Formatting is best-effort: the default implementation passes bytes
//! through unchanged. Linting never blocks a write; diagnostics surface
//! under the `_diagnostics/lint` virtual node.

use crate::error::Result;
use crate::lang::Language;

/// Best-effort source formatter.
pub trait Formatter: Send + Sync {
    /// Format `buf` as `language` source. Implementations may return the
    /// input unchanged; they must not fail on syntactically valid input.
    fn format(&self, buf: &[u8], language: Language) -> Result<Vec<u8>>;
}

/// Default formatter: identity.
#[derive(Debug, Default)]
pub struct PassthroughFormatter;

impl Formatter for PassthroughFormatter {
    fn format(&self, buf: &[u8], _language: Language) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }
}

/// A lint finding. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<usize>,
}

/// Non-blocking linter.
pub trait Linter: Send + Sync {
    fn lint(&self, buf: &[u8], language: Language) -> Vec<Diagnostic>;
}

/// Default linter: no findings.
#[derive(Debug, Default)]
pub struct NoopLinter;

impl Linter for NoopLinter {
    fn lint(&self, _buf: &[u8], _language: Language) -> Vec<Diagnostic> {
        Vec::new()
    }
}
