//! Attribute construction from sampled records.
//!
//! Walks every record to its leaf field paths and derives boolean
//! attributes: a `Presence` attribute per field, `field.year=` /
//! `field.month=` attributes for widely-present date-like fields, and
//! `field=value` enums for low-cardinality fields.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::fca::context::FormalContext;
use crate::record::{value_to_text, Record};

/// Maximum distinct values for enum attribute emission.
pub const ENUM_MAX_CARDINALITY: usize = 20;

/// Maximum cardinality/count ratio for enum attribute emission.
pub const ENUM_MAX_RATIO: f64 = 0.5;

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}").expect("static regex"))
}

/// True when a value looks like an ISO-ish date (`YYYY-MM` prefix).
pub fn is_date_like(text: &str) -> bool {
    date_regex().is_match(text)
}

/// Shannon entropy (bits) of a count distribution.
pub fn entropy<'a>(counts: impl IntoIterator<Item = &'a usize>) -> f64 {
    let counts: Vec<usize> = counts.into_iter().copied().filter(|&c| c > 0).collect();
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

// ── Field statistics ───────────────────────────────────────────────

/// Per-field observations across the sample.
#[derive(Debug, Clone)]
pub struct FieldStats {
    pub path: String,
    /// Records in which the field is present.
    pub count: usize,
    /// Textual value → occurrences. BTreeMap keeps iteration (and
    /// therefore inference) deterministic.
    pub values: BTreeMap<String, usize>,
    /// Values matching the date shape.
    pub date_like: usize,
    /// Values that were JSON strings.
    pub string_count: usize,
}

impl FieldStats {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            count: 0,
            values: BTreeMap::new(),
            date_like: 0,
            string_count: 0,
        }
    }

    pub fn distinct(&self) -> usize {
        self.values.len()
    }

    /// Most of this field's values look like dates.
    pub fn is_date_like(&self) -> bool {
        self.count > 0 && self.date_like * 2 > self.count
    }

    pub fn is_string(&self) -> bool {
        self.count > 0 && self.string_count * 2 > self.count
    }

    pub fn cardinality_ratio(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.distinct() as f64 / self.count as f64
        }
    }

    /// Entropy of the value distribution.
    pub fn intrinsic_entropy(&self) -> f64 {
        entropy(self.values.values())
    }

    /// Distinct `YYYY` prefixes among date-like values.
    pub fn distinct_years(&self) -> Vec<String> {
        let mut years: Vec<String> = self
            .values
            .keys()
            .filter(|v| is_date_like(v))
            .map(|v| v[0..4].to_string())
            .collect();
        years.sort();
        years.dedup();
        years
    }

    /// Distinct `MM` components among date-like values.
    pub fn distinct_months(&self) -> Vec<String> {
        let mut months: Vec<String> = self
            .values
            .keys()
            .filter(|v| is_date_like(v))
            .map(|v| v[5..7].to_string())
            .collect();
        months.sort();
        months.dedup();
        months
    }
}

/// Collect per-field statistics over a record sample.
pub fn collect_field_stats(records: &[Record]) -> BTreeMap<String, FieldStats> {
    let mut stats: BTreeMap<String, FieldStats> = BTreeMap::new();
    for record in records {
        for (path, value) in record.leaf_fields() {
            let entry = stats
                .entry(path.clone())
                .or_insert_with(|| FieldStats::new(&path));
            entry.count += 1;
            if value.is_string() {
                entry.string_count += 1;
            }
            let text = value_to_text(&value);
            if is_date_like(&text) {
                entry.date_like += 1;
            }
            *entry.values.entry(text).or_insert(0) += 1;
        }
    }
    stats
}

// ── Attributes ─────────────────────────────────────────────────────

/// A derived boolean attribute of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// The field exists on the record.
    Presence { field: String },
    /// The field equals a specific low-cardinality value.
    Enum { field: String, value: String },
    /// A date-like field falls in a specific year.
    Year { field: String, year: String },
    /// A date-like field falls in a specific month.
    Month { field: String, month: String },
}

impl Attribute {
    pub fn label(&self) -> String {
        match self {
            Attribute::Presence { field } => field.clone(),
            Attribute::Enum { field, value } => format!("{field}={value}"),
            Attribute::Year { field, year } => format!("{field}.year={year}"),
            Attribute::Month { field, month } => format!("{field}.month={month}"),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Attribute::Presence { field }
            | Attribute::Enum { field, .. }
            | Attribute::Year { field, .. }
            | Attribute::Month { field, .. } => field,
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            Attribute::Presence { .. } => true,
            Attribute::Enum { value, .. } => text == value,
            Attribute::Year { year, .. } => is_date_like(text) && &text[0..4] == year,
            Attribute::Month { month, .. } => is_date_like(text) && &text[5..7] == month,
        }
    }
}

/// Build a formal context from records.
///
/// Objects are record indices; attributes are derived per field:
/// - `Presence` always;
/// - `Year` / `Month` per observed value when the field is date-like and
///   present in more than half the records;
/// - `Enum` per value when cardinality ∈ [2, 20] and
///   cardinality/count ≤ 0.5.
pub fn build_context(records: &[Record]) -> (FormalContext, Vec<Attribute>) {
    let stats = collect_field_stats(records);
    let total = records.len();

    let mut attributes = Vec::new();
    for (path, stat) in &stats {
        attributes.push(Attribute::Presence {
            field: path.clone(),
        });
        if stat.is_date_like() && stat.count * 2 > total {
            for year in stat.distinct_years() {
                attributes.push(Attribute::Year {
                    field: path.clone(),
                    year,
                });
            }
            for month in stat.distinct_months() {
                attributes.push(Attribute::Month {
                    field: path.clone(),
                    month,
                });
            }
        }
        let distinct = stat.distinct();
        if (2..=ENUM_MAX_CARDINALITY).contains(&distinct)
            && stat.cardinality_ratio() <= ENUM_MAX_RATIO
        {
            for value in stat.values.keys() {
                attributes.push(Attribute::Enum {
                    field: path.clone(),
                    value: value.clone(),
                });
            }
        }
    }

    let names = attributes.iter().map(|a| a.label()).collect();
    let mut ctx = FormalContext::new(total, names);
    for (object, record) in records.iter().enumerate() {
        let leaves = record.leaf_fields();
        for (index, attribute) in attributes.iter().enumerate() {
            if let Some(value) = leaves.get(attribute.field()) {
                if attribute.matches(&value_to_text(value)) {
                    ctx.set(object, index);
                }
            }
        }
    }
    (ctx, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Vec<Record> {
        (0..6)
            .map(|i| {
                Record::Json(json!({
                    "id": format!("R-{i}"),
                    "severity": if i % 2 == 0 { "high" } else { "low" },
                    "published": format!("202{}-0{}-01", i % 2 + 3, i % 3 + 1),
                }))
            })
            .collect()
    }

    #[test]
    fn test_entropy() {
        assert_eq!(entropy([4usize].iter()), 0.0);
        assert!((entropy([2usize, 2].iter()) - 1.0).abs() < 1e-9);
        assert!((entropy([1usize, 1, 1, 1].iter()) - 2.0).abs() < 1e-9);
        assert_eq!(entropy(Vec::<usize>::new().iter()), 0.0);
    }

    #[test]
    fn test_date_detection() {
        assert!(is_date_like("2023-07-15"));
        assert!(is_date_like("2023-07"));
        assert!(!is_date_like("not-a-date"));
        assert!(!is_date_like("202-07"));
    }

    #[test]
    fn test_field_stats() {
        let stats = collect_field_stats(&records());
        let severity = &stats["severity"];
        assert_eq!(severity.count, 6);
        assert_eq!(severity.distinct(), 2);
        assert!(!severity.is_date_like());

        let published = &stats["published"];
        assert!(published.is_date_like());
        assert_eq!(published.distinct_years(), vec!["2023", "2024"]);

        let id = &stats["id"];
        assert_eq!(id.distinct(), 6);
        assert!((id.cardinality_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_attribute_emission() {
        let (_, attributes) = build_context(&records());
        let labels: Vec<String> = attributes.iter().map(|a| a.label()).collect();

        // Presence for every field.
        assert!(labels.contains(&"id".to_string()));
        assert!(labels.contains(&"severity".to_string()));
        assert!(labels.contains(&"published".to_string()));

        // Enum attributes for the low-cardinality field.
        assert!(labels.contains(&"severity=high".to_string()));
        assert!(labels.contains(&"severity=low".to_string()));

        // Temporal attributes for the date field.
        assert!(labels.contains(&"published.year=2023".to_string()));
        assert!(labels.contains(&"published.year=2024".to_string()));
        assert!(labels.contains(&"published.month=01".to_string()));

        // No enums for the unique identifier (ratio 1.0 > 0.5).
        assert!(!labels.iter().any(|l| l.starts_with("id=")));
    }

    #[test]
    fn test_incidence_reflects_values() {
        let records = records();
        let (ctx, attributes) = build_context(&records);
        let high = attributes
            .iter()
            .position(|a| a.label() == "severity=high")
            .unwrap();
        assert!(ctx.incidence(0, high));
        assert!(!ctx.incidence(1, high));
    }

    #[test]
    fn test_presence_universal_on_homogeneous_sample() {
        let records = records();
        let (ctx, attributes) = build_context(&records);
        let concepts = crate::fca::enumerate_concepts(&ctx, 1000);
        let top = crate::fca::lattice::top_concept(&concepts).unwrap();
        let universal: Vec<String> = top
            .intent
            .iter()
            .map(|i| attributes[i].label())
            .collect();
        assert!(universal.contains(&"id".to_string()));
        assert!(universal.contains(&"severity".to_string()));
        assert!(universal.contains(&"published".to_string()));
    }
}
