//! Core types for the trialsift pipeline
//!
//! This module defines the data structures that flow through each stage:
//! raw store rows, flattened trial records, and the tagged value union that
//! carries the type-preservation rules for identifier-like fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column name carrying the participant identifier in every flattened record.
pub const COL_PARTICIPANT: &str = "participant_id";
/// Column name carrying the experimental condition.
pub const COL_CONDITION: &str = "condition";
/// Column name carrying the originating store row id.
pub const COL_ROW_ID: &str = "row_id";

/// One row of the `Data` table, as loaded from the store.
///
/// Source of truth for flattening; immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    /// Worker id of the submitting participant.
    pub participant_id: String,
    /// Experimental condition label.
    pub condition: String,
    /// Primary key of the store row, kept for traceability.
    pub row_id: String,
    /// Opaque JSON blob of trial events (array or single object), if any.
    pub json_blob: Option<String>,
}

/// A single cell value in a flattened trial record.
///
/// Numbers keep their exact JSON representation (`serde_json::Number`) so
/// integer identifiers survive without a float round-trip. Nested structures
/// are serialized to canonical JSON text at flatten time and live here as
/// `Text` — they are never decomposed into columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrialValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl TrialValue {
    /// Borrow the text content, if this is a `Text` cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TrialValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read the cell as f64, coercing numeric text on the fly.
    ///
    /// Protected digit strings (see [`TrialValue::is_protected_text`]) refuse
    /// coercion: converting them to f64 is exactly the precision loss the
    /// flattener works to avoid.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TrialValue::Number(n) => n.as_f64(),
            TrialValue::Text(s) if !self.is_protected_text() => {
                let v = s.trim().parse::<f64>().ok()?;
                v.is_finite().then_some(v)
            }
            _ => None,
        }
    }

    /// Read the cell as an integer, accepting digit-string text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TrialValue::Number(n) => n.as_i64(),
            TrialValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Read the cell as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TrialValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TrialValue::Null)
    }

    /// True for text that must never be converted to a native number: an
    /// all-digit string longer than 12 characters (large identifiers, seeds,
    /// timestamps-as-integers).
    pub fn is_protected_text(&self) -> bool {
        match self {
            TrialValue::Text(s) => s.len() > 12 && s.bytes().all(|b| b.is_ascii_digit()),
            _ => false,
        }
    }
}

impl fmt::Display for TrialValue {
    /// Render the cell for delimited export. `Null` renders as the empty
    /// string; numbers render with their exact JSON digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialValue::Text(s) => f.write_str(s),
            TrialValue::Number(n) => write!(f, "{}", n),
            TrialValue::Bool(b) => write!(f, "{}", b),
            TrialValue::Null => Ok(()),
        }
    }
}

/// One flattened trial: an ordered field-name → value mapping.
///
/// Always carries `participant_id`, `condition`, and `row_id` as its first
/// three fields. Field order is preserved so the assembled table's columns
/// come out in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialRecord {
    fields: Vec<(String, TrialValue)>,
}

impl TrialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any existing value under the same name.
    /// A trial key shadowing one of the carrier fields (e.g. `condition`)
    /// wins, matching the merge order of the flattener.
    pub fn insert(&mut self, name: impl Into<String>, value: TrialValue) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&TrialValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TrialValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
