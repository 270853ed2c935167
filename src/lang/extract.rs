//! Identifier extraction seam.
//!
//! The graph's `refs` edge table is fed by a `CallExtractor`: given the
//! materialized content of a file node, it reports which identifiers the
//! content references. Language servers or linters can plug in richer
//! extractors; the built-in one scans for call-shaped identifiers.

use std::path::Path;

use crate::lang::Language;

/// A referenced identifier found in file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    /// The bare identifier, e.g. `HandleRequest`.
    pub token: String,
    /// True when the reference was qualified (`pkg.HandleRequest`,
    /// `self.handle_request`).
    pub qualified: bool,
}

/// Extracts referenced identifiers from materialized file content.
pub trait CallExtractor: Send + Sync {
    fn extract(&self, content: &str, path: &Path, language: Language) -> Vec<CallRef>;
}

/// Built-in extractor: scans for `identifier(` call shapes.
///
/// Deliberately syntactic — it never parses. Keywords of the target
/// language are skipped so `if (`, `for (` and friends don't become refs.
/// Duplicate tokens are collapsed, first occurrence wins.
#[derive(Debug, Default)]
pub struct IdentifierExtractor;

impl IdentifierExtractor {
    fn keywords(language: Language) -> &'static [&'static str] {
        match language {
            Language::Go => &[
                "if", "for", "switch", "select", "return", "go", "defer", "func", "range", "make",
                "new", "len", "cap", "append", "panic", "recover",
            ],
            Language::Python => &[
                "if", "for", "while", "return", "def", "class", "print", "len", "range", "super",
                "isinstance", "str", "int", "list", "dict", "set", "tuple",
            ],
            Language::JavaScript | Language::TypeScript => &[
                "if", "for", "while", "switch", "return", "function", "catch", "typeof", "require",
            ],
            Language::Rust => &[
                "if", "for", "while", "match", "return", "fn", "Some", "None", "Ok", "Err", "vec",
                "println", "format", "panic", "assert",
            ],
            // JSON has no call sites.
            Language::Json => &[],
        }
    }
}

impl CallExtractor for IdentifierExtractor {
    fn extract(&self, content: &str, _path: &Path, language: Language) -> Vec<CallRef> {
        let keywords = Self::keywords(language);
        let bytes = content.as_bytes();
        let mut out: Vec<CallRef> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i] as char;
            if c.is_ascii_alphabetic() || c == '_' {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &content[start..i];
                // Skip whitespace between identifier and a potential paren.
                let mut j = i;
                while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b'(' && !keywords.contains(&word) {
                    let qualified = start > 0 && bytes[start - 1] == b'.';
                    if seen.insert(word.to_string()) {
                        out.push(CallRef {
                            token: word.to_string(),
                            qualified,
                        });
                    }
                }
            } else {
                i += 1;
            }
        }
        out
    }
}
