//! Average-embedding aggregation
//!
//! Independent consumer of the flattened table: for each participant, trials
//! with a recognized response category (positive / negative / uncertain)
//! contribute their stimulus's embedding vector to a per-category running
//! sum, and the per-category averages combine into one composite score.
//!
//! The embedding store is external: one fixed-length numeric vector per
//! stimulus, keyed by the stimulus file stem. A missing vector is logged and
//! that trial skipped; it never fails the run.

use crate::error::PipelineError;
use crate::table::Table;
use crate::types::COL_CONDITION;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Response category of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCategory {
    Positive,
    Negative,
    Uncertain,
}

/// Label and key-code rules mapping a response to its category.
///
/// The label is checked before the key code; that first-match order is the
/// de facto contract where the two overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRules {
    labels: Vec<(String, ResponseCategory)>,
    key_codes: Vec<(i64, ResponseCategory)>,
}

impl Default for CategoryRules {
    /// Rules of the diagnosis-judgment task: `MDD` / `no MDD` / `not sure`,
    /// with the f / j / space key codes as fallback.
    fn default() -> Self {
        Self {
            labels: vec![
                ("MDD".to_string(), ResponseCategory::Positive),
                ("no MDD".to_string(), ResponseCategory::Negative),
                ("not sure".to_string(), ResponseCategory::Uncertain),
            ],
            key_codes: vec![
                (70, ResponseCategory::Positive),
                (74, ResponseCategory::Negative),
                (32, ResponseCategory::Uncertain),
            ],
        }
    }
}

impl CategoryRules {
    pub fn new(
        labels: Vec<(String, ResponseCategory)>,
        key_codes: Vec<(i64, ResponseCategory)>,
    ) -> Self {
        Self { labels, key_codes }
    }

    fn classify(&self, label: Option<&str>, key_code: Option<i64>) -> Option<ResponseCategory> {
        if let Some(label) = label {
            if let Some((_, cat)) = self.labels.iter().find(|(l, _)| l == label) {
                return Some(*cat);
            }
        }
        if let Some(code) = key_code {
            if let Some((_, cat)) = self.key_codes.iter().find(|(c, _)| *c == code) {
                return Some(*cat);
            }
        }
        None
    }
}

/// Per-condition category rules with a shared default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMap {
    default: CategoryRules,
    by_condition: HashMap<String, CategoryRules>,
}

impl CategoryMap {
    pub fn with_default(default: CategoryRules) -> Self {
        Self {
            default,
            by_condition: HashMap::new(),
        }
    }

    /// Override the rules for one condition.
    pub fn set_condition(&mut self, condition: impl Into<String>, rules: CategoryRules) {
        self.by_condition.insert(condition.into(), rules);
    }

    pub fn classify(
        &self,
        condition: Option<&str>,
        label: Option<&str>,
        key_code: Option<i64>,
    ) -> Option<ResponseCategory> {
        let rules = condition
            .and_then(|c| self.by_condition.get(c))
            .unwrap_or(&self.default);
        rules.classify(label, key_code)
    }
}

/// External keyed store of stimulus embedding vectors.
pub trait EmbeddingStore {
    /// Look up the vector for a stimulus key; `Ok(None)` when absent.
    fn vector(&self, key: &str) -> Result<Option<Vec<f64>>, PipelineError>;
}

/// Directory-backed store: one JSON number array per `<key>.<extension>` file,
/// read individually per lookup.
pub struct DirEmbeddingStore {
    dir: PathBuf,
    extension: String,
}

impl DirEmbeddingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "json".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

impl EmbeddingStore for DirEmbeddingStore {
    fn vector(&self, key: &str) -> Result<Option<Vec<f64>>, PipelineError> {
        let path = self.dir.join(format!("{key}.{}", self.extension));
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let vector: Vec<f64> = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Embedding(format!("bad vector file {}: {e}", path.display()))
        })?;
        Ok(Some(vector))
    }
}

/// Per-participant category averages and composite score.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantEmbedding {
    pub participant_id: String,
    pub positive: Option<Vec<f64>>,
    pub negative: Option<Vec<f64>>,
    pub uncertain: Option<Vec<f64>>,
    /// Scalar mean of the element-wise positive - negative + uncertain
    /// vector; `None` unless all three category averages are defined.
    pub composite: Option<f64>,
}

/// Running sum and count for one (participant, category) cell. Scoped to a
/// single aggregation call; there is no process-wide accumulation state.
#[derive(Debug, Default)]
struct Accumulator {
    sum: Vec<f64>,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, vector: &[f64]) -> bool {
        if self.count == 0 {
            self.sum = vector.to_vec();
            self.count = 1;
            return true;
        }
        if vector.len() != self.sum.len() {
            return false;
        }
        for (slot, v) in self.sum.iter_mut().zip(vector) {
            *slot += v;
        }
        self.count += 1;
        true
    }

    fn average(&self) -> Option<Vec<f64>> {
        (self.count > 0).then(|| {
            self.sum
                .iter()
                .map(|v| v / self.count as f64)
                .collect()
        })
    }
}

/// Average the stimulus embeddings per participant and response category.
///
/// The table may be pre- or post-filter; the caller chooses. Rows without a
/// recognized response category are ignored; rows whose stimulus has no
/// stored vector are logged and skipped.
pub fn average_embeddings(
    table: &Table,
    store: &dyn EmbeddingStore,
    categories: &CategoryMap,
) -> Result<Vec<ParticipantEmbedding>, PipelineError> {
    let mut accumulators: HashMap<(String, ResponseCategory), Accumulator> = HashMap::new();

    for row in 0..table.len() {
        let Some(id) = table.participant_of(row) else {
            continue;
        };
        let condition = table.value(row, COL_CONDITION).and_then(|v| v.as_str());
        let label = table.value(row, "response_label").and_then(|v| v.as_str());
        let key_code = table.value(row, "key_press").and_then(|v| v.as_i64());
        let Some(category) = categories.classify(condition, label, key_code) else {
            continue;
        };
        let Some(stimulus) = table.value(row, "stimulus").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(key) = stimulus_stem(stimulus) else {
            continue;
        };
        let Some(vector) = store.vector(key)? else {
            warn!("no embedding vector for stimulus {key}, skipping trial");
            continue;
        };
        let slot = accumulators
            .entry((id.to_string(), category))
            .or_default();
        if !slot.add(&vector) {
            warn!(
                "dimension mismatch for stimulus {key} ({} vs {}), skipping trial",
                vector.len(),
                slot.sum.len()
            );
        }
    }

    let mut out = Vec::new();
    for id in table.participant_ids() {
        let average_of = |cat: ResponseCategory| -> Option<Vec<f64>> {
            accumulators
                .get(&(id.clone(), cat))
                .and_then(Accumulator::average)
        };
        let positive = average_of(ResponseCategory::Positive);
        let negative = average_of(ResponseCategory::Negative);
        let uncertain = average_of(ResponseCategory::Uncertain);
        let composite = match (&positive, &negative, &uncertain) {
            (Some(p), Some(n), Some(u))
                if !p.is_empty() && p.len() == n.len() && p.len() == u.len() =>
            {
                let sum: f64 = p
                    .iter()
                    .zip(n)
                    .zip(u)
                    .map(|((p, n), u)| p - n + u)
                    .sum();
                Some(sum / p.len() as f64)
            }
            _ => None,
        };
        out.push(ParticipantEmbedding {
            participant_id: id,
            positive,
            negative,
            uncertain,
            composite,
        });
    }
    Ok(out)
}

/// File stem of a stimulus path: `src/images/main/3.jpg` -> `3`.
fn stimulus_stem(stimulus: &str) -> Option<&str> {
    Path::new(stimulus).file_stem().and_then(|s| s.to_str())
}
