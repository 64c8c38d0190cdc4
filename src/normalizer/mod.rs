//! Tolerant normalization of per-channel device responses
//!
//! The device (and different firmware builds of it) return per-channel data in
//! several shapes:
//!
//! - an object keyed by stringified index: `{"0": {...}, "1": {...}}`
//! - an object wrapping one of the other shapes: `{"channels": [...]}`
//! - a list of objects, each with an `index` field or indexed by position
//! - a single bare record carrying an `index` field
//!
//! [`normalize`] folds all of them into one canonical form: records sorted by
//! ascending index, unique, each with an `index` field. Items that cannot be
//! placed are dropped and reported as [`Diagnostic`]s, never as errors.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::MAX_CHANNEL_INDEX;

/// Wrapper objects are unwrapped at most this many levels deep
pub const MAX_UNWRAP_DEPTH: usize = 2;

pub const INDEX_FIELD: &str = "index";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub index: u8,
    /// Always contains [`INDEX_FIELD`] set to `index`
    pub fields: Map<String, Value>,
}

/// Why part of a payload was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    UnresolvableIndex { location: String, reason: String },
    NotAnObject { location: String },
    DuplicateIndex { index: u8, location: String },
    UnsupportedShape { description: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvableIndex { location, reason } => {
                write!(f, "dropped item at {location}: {reason}")
            }
            Self::NotAnObject { location } => write!(f, "dropped non-object item at {location}"),
            Self::DuplicateIndex { index, location } => {
                write!(f, "dropped duplicate index {index} at {location}")
            }
            Self::UnsupportedShape { description } => {
                write!(f, "unsupported payload shape: {description}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Normalized {
    pub records: Vec<NormalizedRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: u8) -> Option<&NormalizedRecord> {
        self.records
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .map(|pos| &self.records[pos])
    }

    /// Canonical JSON form: a list of records with explicit indices
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.records
                .iter()
                .map(|r| Value::Object(r.fields.clone()))
                .collect(),
        )
    }
}

/// Normalize any supported per-channel payload shape
pub fn normalize(raw: &Value) -> Normalized {
    let mut collector = Collector::default();
    collector.visit(raw, 0, "$");
    collector.finish()
}

/// Resolve an index value: non-negative integers (or integer strings) up to
/// [`MAX_CHANNEL_INDEX`]
pub fn resolve_index(value: &Value) -> Result<u8, String> {
    let candidate = match value {
        Value::Number(n) => match n.as_u64() {
            Some(v) => Some(v),
            None => n
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64),
        },
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match candidate {
        Some(v) if v <= u64::from(MAX_CHANNEL_INDEX) => Ok(v as u8),
        Some(v) => Err(format!("index {v} out of range 0..={MAX_CHANNEL_INDEX}")),
        None => Err(format!("index {value} is not a non-negative integer")),
    }
}

fn is_index_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Default)]
struct Collector {
    records: BTreeMap<u8, Map<String, Value>>,
    diagnostics: Vec<Diagnostic>,
}

impl Collector {
    fn visit(&mut self, value: &Value, depth: usize, location: &str) {
        match value {
            Value::Array(items) => self.visit_list(items, location),
            Value::Object(map) if map.is_empty() => {}
            Value::Object(map) if map.contains_key(INDEX_FIELD) => {
                self.visit_list(std::slice::from_ref(value), location)
            }
            Value::Object(map) if map.keys().any(|k| is_index_key(k)) => {
                self.visit_keyed(map, location)
            }
            Value::Object(map) => self.visit_wrapper(map, depth, location),
            Value::Null => {}
            other => self.diagnostics.push(Diagnostic::UnsupportedShape {
                description: format!("{location} is a {}", json_kind(other)),
            }),
        }
    }

    fn visit_wrapper(&mut self, map: &Map<String, Value>, depth: usize, location: &str) {
        let mut nested = map
            .iter()
            .filter(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)));
        match (nested.next(), nested.next()) {
            (Some((key, inner)), None) if depth < MAX_UNWRAP_DEPTH => {
                self.visit(inner, depth + 1, &format!("{location}.{key}"))
            }
            (Some(_), None) => self.diagnostics.push(Diagnostic::UnsupportedShape {
                description: format!("{location} nested deeper than {MAX_UNWRAP_DEPTH} wrappers"),
            }),
            _ => self.diagnostics.push(Diagnostic::UnsupportedShape {
                description: format!("{location} is an object without a channel collection"),
            }),
        }
    }

    fn visit_keyed(&mut self, map: &Map<String, Value>, location: &str) {
        for (key, item) in map {
            let item_location = format!("{location}.{key}");
            let index = match resolve_index(&Value::String(key.clone())) {
                Ok(index) => index,
                Err(reason) => {
                    self.diagnostics.push(Diagnostic::UnresolvableIndex {
                        location: item_location,
                        reason,
                    });
                    continue;
                }
            };
            match item {
                Value::Object(fields) => self.insert(index, fields, item_location),
                _ => self.diagnostics.push(Diagnostic::NotAnObject {
                    location: item_location,
                }),
            }
        }
    }

    fn visit_list(&mut self, items: &[Value], location: &str) {
        for (position, item) in items.iter().enumerate() {
            let item_location = format!("{location}[{position}]");
            let Value::Object(fields) = item else {
                self.diagnostics.push(Diagnostic::NotAnObject {
                    location: item_location,
                });
                continue;
            };
            let resolved = match fields.get(INDEX_FIELD) {
                Some(raw) => resolve_index(raw),
                None => u8::try_from(position)
                    .ok()
                    .filter(|p| *p <= MAX_CHANNEL_INDEX)
                    .ok_or_else(|| format!("position {position} out of range 0..={MAX_CHANNEL_INDEX}")),
            };
            match resolved {
                Ok(index) => self.insert(index, fields, item_location),
                Err(reason) => self.diagnostics.push(Diagnostic::UnresolvableIndex {
                    location: item_location,
                    reason,
                }),
            }
        }
    }

    fn insert(&mut self, index: u8, fields: &Map<String, Value>, location: String) {
        if self.records.contains_key(&index) {
            self.diagnostics
                .push(Diagnostic::DuplicateIndex { index, location });
            return;
        }
        let mut fields = fields.clone();
        fields.insert(INDEX_FIELD.to_string(), Value::from(index));
        self.records.insert(index, fields);
    }

    fn finish(self) -> Normalized {
        Normalized {
            records: self
                .records
                .into_iter()
                .map(|(index, fields)| NormalizedRecord { index, fields })
                .collect(),
            diagnostics: self.diagnostics,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn indices(normalized: &Normalized) -> Vec<u8> {
        normalized.records.iter().map(|r| r.index).collect()
    }

    #[test]
    fn test_keyed_object() {
        let out = normalize(&json!({
            "1": {"label": "Kitchen"},
            "0": {"label": "Main"},
            "10": {"label": "Garage"}
        }));
        assert_eq!(indices(&out), vec![0, 1, 10]);
        assert_eq!(out.records[0].fields["index"], json!(0));
        assert_eq!(out.records[0].fields["label"], json!("Main"));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_key_wins_over_inner_index() {
        let out = normalize(&json!({"3": {"index": 7, "label": "Oven"}}));
        assert_eq!(indices(&out), vec![3]);
        assert_eq!(out.records[0].fields["index"], json!(3));
    }

    #[test]
    fn test_wrapped_list() {
        let out = normalize(&json!({"channels": [{"index": 2}, {"index": 0}]}));
        assert_eq!(indices(&out), vec![0, 2]);
    }

    #[test]
    fn test_double_wrapper_is_unwrapped() {
        let out = normalize(&json!({"data": {"channels": {"0": {"label": "Main"}}}}));
        assert_eq!(indices(&out), vec![0]);
    }

    #[test]
    fn test_wrappers_beyond_depth_are_rejected() {
        let out = normalize(&json!({"a": {"b": {"c": [{"index": 0}]}}}));
        assert!(out.is_empty());
        assert!(matches!(
            out.diagnostics.as_slice(),
            [Diagnostic::UnsupportedShape { .. }]
        ));
    }

    #[test]
    fn test_list_position_is_fallback_index() {
        let out = normalize(&json!([{"label": "A"}, {"label": "B"}, {"index": 5, "label": "C"}]));
        assert_eq!(indices(&out), vec![0, 1, 5]);
        assert_eq!(out.get(1).map(|r| &r.fields["label"]), Some(&json!("B")));
    }

    #[test]
    fn test_single_bare_record() {
        let out = normalize(&json!({"index": 4, "label": "Heat pump", "data": {"voltage": 230.1}}));
        assert_eq!(indices(&out), vec![4]);
        assert_eq!(out.records[0].fields["data"]["voltage"], json!(230.1));
    }

    #[test]
    fn test_unresolvable_items_are_dropped_with_diagnostics() {
        let out = normalize(&json!([
            {"index": "abc"},
            {"index": 17},
            "not an object",
            {"index": "2"},
            {"index": -1}
        ]));
        assert_eq!(indices(&out), vec![2]);
        assert_eq!(out.diagnostics.len(), 4);
        assert!(matches!(out.diagnostics[2], Diagnostic::NotAnObject { .. }));
    }

    #[test]
    fn test_out_of_range_key_is_dropped() {
        let out = normalize(&json!({"0": {}, "99": {}}));
        assert_eq!(indices(&out), vec![0]);
        assert!(matches!(
            out.diagnostics.as_slice(),
            [Diagnostic::UnresolvableIndex { .. }]
        ));
    }

    #[test]
    fn test_non_numeric_key_in_keyed_object_is_dropped() {
        let out = normalize(&json!({"0": {"label": "Main"}, "total": {"label": "Sum"}}));
        assert_eq!(indices(&out), vec![0]);
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn test_duplicate_index_keeps_first() {
        let out = normalize(&json!([
            {"index": 1, "label": "first"},
            {"index": 1, "label": "second"}
        ]));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].fields["label"], json!("first"));
        assert_eq!(
            out.diagnostics,
            vec![Diagnostic::DuplicateIndex {
                index: 1,
                location: "$[1]".to_string()
            }]
        );
    }

    #[test]
    fn test_scalars_and_null() {
        assert!(normalize(&Value::Null).diagnostics.is_empty());
        assert!(normalize(&json!({})).is_empty());
        let out = normalize(&json!(42));
        assert!(out.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn test_idempotent_on_canonical_form() {
        let first = normalize(&json!({"2": {"label": "B"}, "0": {"label": "A"}}));
        let second = normalize(&first.to_value());
        assert_eq!(first.records, second.records);
        assert!(second.diagnostics.is_empty());
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::DuplicateIndex {
            index: 3,
            location: "$[4]".to_string(),
        };
        assert_eq!(diag.to_string(), "dropped duplicate index 3 at $[4]");
    }
}
