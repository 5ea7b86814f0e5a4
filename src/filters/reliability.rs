//! Response-reliability scorer and filter
//!
//! Sessions re-present some stimuli as repeat trials. Per participant, each
//! repeat trial is matched against the earlier presentation of the same
//! stimulus and scored +1 when the two response labels agree, -1 when they
//! disagree; the mean of the pair scores is the participant's reliability,
//! naturally bounded to [-1, 1].
//!
//! Participants with no scored pair (no repeat trials, or no repeat matching
//! an original stimulus) are absent from the score map and are excluded by
//! the filter. Two historical policies exist for the pass threshold and for
//! "not sure" responses; both are expressed in [`ReliabilityPolicy`] instead
//! of hard-coding either.

use crate::table::Table;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Pass threshold applied to the mean pair score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreThreshold {
    /// Pass on score > 0 (current policy).
    #[default]
    StrictlyPositive,
    /// Pass on score >= 0 (historical policy).
    NonNegative,
}

impl ScoreThreshold {
    pub fn passes(self, score: f64) -> bool {
        match self {
            ScoreThreshold::StrictlyPositive => score > 0.0,
            ScoreThreshold::NonNegative => score >= 0.0,
        }
    }
}

/// Configurable scoring policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityPolicy {
    pub threshold: ScoreThreshold,
    /// When set, pairs where either response equals `uncertain_label` are
    /// skipped before scoring.
    pub exclude_uncertain: bool,
    pub uncertain_label: String,
}

impl Default for ReliabilityPolicy {
    fn default() -> Self {
        Self {
            threshold: ScoreThreshold::StrictlyPositive,
            exclude_uncertain: false,
            uncertain_label: "not sure".to_string(),
        }
    }
}

impl ReliabilityPolicy {
    /// The historical variant: inclusive threshold, "not sure" pairs skipped.
    pub fn legacy() -> Self {
        Self {
            threshold: ScoreThreshold::NonNegative,
            exclude_uncertain: true,
            ..Self::default()
        }
    }
}

/// Mean pair score per participant.
///
/// Participants with zero valid comparison pairs do not appear in the map:
/// they are non-comparable rather than passed or failed, and the filter
/// excludes them.
pub fn score_participants(table: &Table, policy: &ReliabilityPolicy) -> HashMap<String, f64> {
    struct Responses {
        repeats: Vec<(String, Option<String>)>,
        originals: HashMap<String, Option<String>>,
    }

    let mut by_participant: HashMap<String, Responses> = HashMap::new();
    for row in 0..table.len() {
        let Some(repeat) = table.value(row, "repeat").and_then(|v| v.as_bool()) else {
            continue;
        };
        let Some(id) = table.participant_of(row) else {
            continue;
        };
        let stimulus = match table.value(row, "stimulus_number") {
            Some(v) if !v.is_null() => v.to_string(),
            _ => continue,
        };
        let label = match table.value(row, "response_label") {
            Some(v) if !v.is_null() => Some(v.to_string()),
            _ => None,
        };

        let entry = by_participant
            .entry(id.to_string())
            .or_insert_with(|| Responses {
                repeats: Vec::new(),
                originals: HashMap::new(),
            });
        if repeat {
            entry.repeats.push((stimulus, label));
        } else {
            // First presentation wins when a stimulus somehow occurs twice.
            entry.originals.entry(stimulus).or_insert(label);
        }
    }

    let mut scores = HashMap::new();
    for (id, responses) in by_participant {
        let mut pair_scores: Vec<f64> = Vec::new();
        for (stimulus, repeat_label) in &responses.repeats {
            let Some(original_label) = responses.originals.get(stimulus) else {
                continue;
            };
            let (Some(a), Some(b)) = (repeat_label, original_label) else {
                continue;
            };
            if policy.exclude_uncertain
                && (a == &policy.uncertain_label || b == &policy.uncertain_label)
            {
                continue;
            }
            pair_scores.push(if a == b { 1.0 } else { -1.0 });
        }
        if !pair_scores.is_empty() {
            scores.insert(id, pair_scores.iter().sum::<f64>() / pair_scores.len() as f64);
        }
    }
    scores
}

/// Restrict the table to participants whose reliability meets the policy.
pub fn apply(table: &Table, policy: &ReliabilityPolicy) -> Table {
    let scores = score_participants(table, policy);
    let passed: HashSet<String> = scores
        .iter()
        .filter(|(_, score)| policy.threshold.passes(**score))
        .map(|(id, _)| id.clone())
        .collect();
    let filtered = table.restrict_to(&passed);
    info!(
        "reliability filter: {} -> {} rows, {} of {} scored participants pass",
        table.len(),
        filtered.len(),
        passed.len(),
        scores.len()
    );
    filtered
}
