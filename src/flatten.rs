//! Record flattening
//!
//! This module turns one raw store row (participant id, condition, opaque
//! JSON blob of trial events) into zero or more flat [`TrialRecord`]s,
//! applying the type-preservation rules field by field:
//!
//! - a field named `seed` is always kept as text
//! - numeric values with magnitude above 10^12 are kept as their exact digits
//! - all-digit strings longer than 12 characters stay text (numbers that
//!   arrived pre-stringified)
//! - nested lists/objects are serialized to canonical JSON text
//!
//! A malformed blob never aborts the run: the row is logged and skipped.

use crate::types::{RawRow, TrialRecord, TrialValue, COL_CONDITION, COL_PARTICIPANT, COL_ROW_ID};
use serde_json::Value;
use tracing::warn;

/// Magnitude above which a numeric value is kept as text. Float or fixed-width
/// integer representations silently lose digits on identifiers this large.
const NUMERIC_TEXT_THRESHOLD: f64 = 1e12;

/// Field name that is always forced to text regardless of value shape.
const SEED_FIELD: &str = "seed";

/// Flatten every raw row, in input order.
pub fn flatten_rows(rows: &[RawRow]) -> Vec<TrialRecord> {
    rows.iter().flat_map(flatten_row).collect()
}

/// Flatten one raw row into its trial records.
///
/// Pure function of the input row: the blob is parsed once, a non-array value
/// is treated as a single-element sequence, and each object element becomes
/// one record merged with the row's carrier fields. Non-object elements are
/// skipped with a warning.
pub fn flatten_row(row: &RawRow) -> Vec<TrialRecord> {
    let blob = match row.json_blob.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => return Vec::new(),
    };

    let parsed: Value = match serde_json::from_str(blob) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                participant_id = %row.participant_id,
                row_id = %row.row_id,
                "skipping row with malformed trial JSON: {e}"
            );
            return Vec::new();
        }
    };

    let elements = match parsed {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut records = Vec::new();
    for element in elements {
        let trial = match element {
            Value::Object(map) => map,
            other => {
                warn!(
                    participant_id = %row.participant_id,
                    row_id = %row.row_id,
                    "skipping non-object trial element: {other}"
                );
                continue;
            }
        };

        let mut record = TrialRecord::new();
        record.insert(COL_PARTICIPANT, TrialValue::Text(row.participant_id.clone()));
        record.insert(COL_CONDITION, TrialValue::Text(row.condition.clone()));
        record.insert(COL_ROW_ID, TrialValue::Text(row.row_id.clone()));

        for (key, value) in trial {
            let preserved = preserve_value(&key, value);
            record.insert(key, preserved);
        }
        records.push(record);
    }
    records
}

/// Apply the type-preservation rules to one field.
fn preserve_value(key: &str, value: Value) -> TrialValue {
    if key == SEED_FIELD {
        return TrialValue::Text(value_as_exact_text(&value));
    }
    match value {
        Value::Number(n) => {
            let magnitude = n.as_f64().map(f64::abs).unwrap_or(f64::INFINITY);
            if magnitude > NUMERIC_TEXT_THRESHOLD {
                // to_string on serde_json::Number reproduces the exact
                // integer digits; no float round-trip happens here.
                TrialValue::Text(n.to_string())
            } else {
                TrialValue::Number(n)
            }
        }
        Value::String(s) => TrialValue::Text(s),
        Value::Bool(b) => TrialValue::Bool(b),
        Value::Null => TrialValue::Null,
        composite @ (Value::Array(_) | Value::Object(_)) => {
            TrialValue::Text(composite.to_string())
        }
    }
}

/// Exact textual form of a JSON value, used for forced-string fields.
fn value_as_exact_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(blob: Option<&str>) -> RawRow {
        RawRow {
            participant_id: "w1".to_string(),
            condition: "A".to_string(),
            row_id: "7".to_string(),
            json_blob: blob.map(str::to_string),
        }
    }

    #[test]
    fn test_array_blob_yields_one_record_per_trial() {
        let records = flatten_row(&row(Some(
            r#"[{"trial_index": 0, "rt": 512}, {"trial_index": 1, "rt": 433}]"#,
        )));
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(
                record.get(COL_PARTICIPANT),
                Some(&TrialValue::Text("w1".to_string()))
            );
            assert_eq!(
                record.get(COL_CONDITION),
                Some(&TrialValue::Text("A".to_string()))
            );
        }
    }

    #[test]
    fn test_single_object_blob_is_wrapped() {
        let records = flatten_row(&row(Some(r#"{"trial_index": 0}"#)));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_blob_is_skipped() {
        assert!(flatten_row(&row(Some("{not json"))).is_empty());
        assert!(flatten_row(&row(None)).is_empty());
    }

    #[test]
    fn test_bare_string_blob_is_skipped() {
        // Parses as JSON but is not an object: treated as one bad element.
        assert!(flatten_row(&row(Some(r#""not an array or object""#))).is_empty());
    }

    #[test]
    fn test_seed_forced_to_text() {
        let records = flatten_row(&row(Some(r#"[{"seed": 4242}]"#)));
        assert_eq!(
            records[0].get("seed"),
            Some(&TrialValue::Text("4242".to_string()))
        );
    }

    #[test]
    fn test_large_number_keeps_exact_digits() {
        let records = flatten_row(&row(Some(r#"[{"anon": 9007199254740993}]"#)));
        // 2^53 + 1 is not representable as f64; the digits must survive.
        assert_eq!(
            records[0].get("anon"),
            Some(&TrialValue::Text("9007199254740993".to_string()))
        );
    }

    #[test]
    fn test_long_digit_string_stays_text() {
        let records = flatten_row(&row(Some(r#"[{"stamp": "123456789012345"}]"#)));
        let value = records[0].get("stamp").unwrap();
        assert_eq!(value, &TrialValue::Text("123456789012345".to_string()));
        assert!(value.is_protected_text());
    }

    #[test]
    fn test_small_number_passes_through() {
        let records = flatten_row(&row(Some(r#"[{"rt": 512}]"#)));
        assert_eq!(records[0].get("rt").unwrap().as_f64(), Some(512.0));
    }

    #[test]
    fn test_composite_serialized_to_text() {
        let records = flatten_row(&row(Some(
            r#"[{"browser_events": [{"event": "focus", "time": 100}]}]"#,
        )));
        let cell = records[0].get("browser_events").unwrap();
        let round_trip: serde_json::Value =
            serde_json::from_str(cell.as_str().unwrap()).unwrap();
        assert_eq!(round_trip[0]["event"], "focus");
    }

    #[test]
    fn test_trial_condition_shadows_carrier() {
        let records = flatten_row(&row(Some(r#"[{"condition": "B"}]"#)));
        assert_eq!(
            records[0].get(COL_CONDITION),
            Some(&TrialValue::Text("B".to_string()))
        );
    }
}
