//! Engagement self-report filter
//!
//! Survey trials carry their answers as a serialized JSON payload inside the
//! flattened table, so this filter performs a secondary parse. A participant
//! passes when any of their survey rows reports a seriousness of at least 70.
//! Malformed or incomplete payloads never fail the run; they simply cannot
//! make that row pass.

use crate::table::Table;
use std::collections::HashSet;
use tracing::{info, warn};

/// Trial-type marker of the survey form.
pub const SURVEY_TRIAL_TYPE: &str = "render-mustache-template";

/// Column holding the serialized survey payload.
pub const FORM_DATA_COLUMN: &str = "form_data";

/// Field of the payload carrying the self-reported seriousness.
pub const SERIOUSNESS_FIELD: &str = "seriousness";

/// Minimum self-reported seriousness to pass.
pub const MIN_SERIOUSNESS: i64 = 70;

/// Restrict the table to participants who self-reported engagement.
pub fn apply(table: &Table) -> Table {
    let passed = passing_participants(table);
    let filtered = table.restrict_to(&passed);
    info!(
        "engagement filter: {} -> {} rows, {} participants pass",
        table.len(),
        filtered.len(),
        passed.len()
    );
    filtered
}

fn passing_participants(table: &Table) -> HashSet<String> {
    let mut passed = HashSet::new();
    for row in 0..table.len() {
        let is_survey = table
            .value(row, "trial_type")
            .and_then(|v| v.as_str())
            .is_some_and(|t| t == SURVEY_TRIAL_TYPE);
        if !is_survey {
            continue;
        }
        let Some(payload) = table.value(row, FORM_DATA_COLUMN).and_then(|v| v.as_str())
        else {
            continue;
        };
        if payload_passes(payload) {
            if let Some(id) = table.participant_of(row) {
                passed.insert(id.to_string());
            }
        }
    }
    passed
}

/// Secondary parse of one survey payload.
fn payload_passes(payload: &str) -> bool {
    let parsed: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!("unparseable survey payload, row cannot pass: {e}");
            return false;
        }
    };
    seriousness_of(&parsed).is_some_and(|s| s >= MIN_SERIOUSNESS)
}

/// Extract seriousness as an integer, accepting both a JSON number and a
/// digit string (survey widgets report either, depending on version).
fn seriousness_of(payload: &serde_json::Value) -> Option<i64> {
    match payload.get(SERIOUSNESS_FIELD)? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => {
            let t = s.trim();
            (!t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
                .then(|| t.parse().ok())
                .flatten()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TrialRecord, TrialValue, COL_PARTICIPANT};
    use pretty_assertions::assert_eq;

    fn survey_row(id: &str, payload: Option<&str>) -> TrialRecord {
        let mut r = TrialRecord::new();
        r.insert(COL_PARTICIPANT, TrialValue::Text(id.to_string()));
        r.insert(
            "trial_type",
            TrialValue::Text(SURVEY_TRIAL_TYPE.to_string()),
        );
        match payload {
            Some(p) => r.insert(FORM_DATA_COLUMN, TrialValue::Text(p.to_string())),
            None => r.insert(FORM_DATA_COLUMN, TrialValue::Null),
        }
        r
    }

    #[test]
    fn test_serious_participant_passes() {
        let table = Table::assemble(vec![
            survey_row("w1", Some(r#"{"seriousness": "85", "issues": "none"}"#)),
            survey_row("w2", Some(r#"{"seriousness": "40"}"#)),
        ]);
        assert_eq!(apply(&table).participant_ids(), vec!["w1".to_string()]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let table = Table::assemble(vec![survey_row("w1", Some(r#"{"seriousness": 70}"#))]);
        assert_eq!(apply(&table).len(), 1);
    }

    #[test]
    fn test_malformed_payload_does_not_pass() {
        let table = Table::assemble(vec![
            survey_row("w1", Some("{broken")),
            survey_row("w2", Some(r#"{"other": 1}"#)),
            survey_row("w3", None),
            survey_row("w4", Some(r#"{"seriousness": "very"}"#)),
        ]);
        assert!(apply(&table).is_empty());
    }

    #[test]
    fn test_participant_can_pass_via_second_survey_row() {
        let table = Table::assemble(vec![
            survey_row("w1", Some("{broken")),
            survey_row("w1", Some(r#"{"seriousness": "90"}"#)),
        ]);
        assert_eq!(apply(&table).len(), 2);
    }
}
