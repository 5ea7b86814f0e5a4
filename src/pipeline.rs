//! Pipeline orchestration
//!
//! The public entry point of trialsift. A run is one bulk read of the study
//! database followed by in-memory table transformations and sequential file
//! exports: raw dumps → flattening → assembly → the three exclusion filters
//! in strict order → survivor exports → optional embedding aggregation.
//!
//! Attrition is reported at every stage boundary (rows and participants
//! before/after) so a human can sanity-check the filters, and the same
//! counts come back in the [`RunSummary`] for programmatic checks.

use crate::embedding::{average_embeddings, CategoryMap, DirEmbeddingStore};
use crate::error::PipelineError;
use crate::export;
use crate::filters::{engagement, reliability, screen};
use crate::filters::reliability::ReliabilityPolicy;
use crate::flatten::flatten_rows;
use crate::store::StudyStore;
use crate::table::Table;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

/// Roster column holding the participant identifier in the store schema.
const ROSTER_KEY: &str = "worker_id";

/// Run configuration.
#[derive(Debug, Clone)]
pub struct QcConfig {
    pub database_path: PathBuf,
    pub output_dir: PathBuf,
    /// Directory of per-stimulus embedding vectors. When absent, the
    /// aggregation stage is skipped.
    pub embedding_dir: Option<PathBuf>,
    pub reliability: ReliabilityPolicy,
    pub categories: CategoryMap,
}

impl QcConfig {
    pub fn new(database_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            output_dir: output_dir.into(),
            embedding_dir: None,
            reliability: ReliabilityPolicy::default(),
            categories: CategoryMap::default(),
        }
    }

    pub fn with_embedding_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.embedding_dir = Some(dir.into());
        self
    }

    pub fn with_reliability(mut self, policy: ReliabilityPolicy) -> Self {
        self.reliability = policy;
        self
    }

    pub fn with_categories(mut self, categories: CategoryMap) -> Self {
        self.categories = categories;
        self
    }
}

/// Row and participant counts at one stage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    pub rows: usize,
    pub participants: usize,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    fn record(&mut self, stage: &str, table: &Table) {
        let report = StageReport {
            stage: stage.to_string(),
            rows: table.len(),
            participants: table.participant_ids().len(),
        };
        info!(
            "{}: {} rows, {} participants",
            report.stage, report.rows, report.participants
        );
        self.stages.push(report);
    }
}

/// One configured quality-control run.
pub struct QcPipeline {
    config: QcConfig,
}

impl QcPipeline {
    pub fn new(config: QcConfig) -> Self {
        Self { config }
    }

    /// Execute the full pipeline.
    ///
    /// Store and export failures abort the run; the embedding aggregation is
    /// an independent final export, so its failure is logged and the summary
    /// still returned.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let out = &self.config.output_dir;
        fs::create_dir_all(out)?;

        info!(
            "trialsift {} processing {}",
            crate::TRIALSIFT_VERSION,
            self.config.database_path.display()
        );
        let store = StudyStore::open(&self.config.database_path)?;
        let mut summary = RunSummary {
            started_at: Utc::now(),
            stages: Vec::new(),
        };

        // Raw dumps first, before any transformation can fail.
        let data_dump = store.dump_table("Data")?;
        export::write_dump(&out.join("Data.csv"), &data_dump)?;
        let roster = store.load_participants()?;
        export::write_dump(&out.join("Participant.csv"), &roster)?;

        // Flatten and assemble.
        let raw_rows = store.load_raw_rows()?;
        let table = Table::assemble(flatten_rows(&raw_rows));
        summary.record("flattened", &table);
        export::write_table(&out.join("Data_expanded.csv"), &table)?;

        // The three filters, in strict sequence.
        let after_screen = screen::apply(&table);
        summary.record("after_screen_check", &after_screen);
        export::write_table(&out.join("data_expanded_after_screen.csv"), &after_screen)?;

        let after_engagement = engagement::apply(&after_screen);
        summary.record("after_engagement_check", &after_engagement);
        export::write_table(
            &out.join("data_expanded_after_engagement.csv"),
            &after_engagement,
        )?;

        let after_checks = reliability::apply(&after_engagement, &self.config.reliability);
        summary.record("after_reliability_check", &after_checks);
        export::write_table(&out.join("data_expanded_after_checks.csv"), &after_checks)?;

        // Survivor exports.
        let survivors = after_checks.participant_set();
        export::write_dump(
            &out.join("participants_after_checks.csv"),
            &roster.restrict_by(ROSTER_KEY, &survivors)?,
        )?;
        export::write_dump(
            &out.join("data_after_checks.csv"),
            &data_dump.restrict_by(ROSTER_KEY, &survivors)?,
        )?;

        // Independent aggregation export, over the cleaned table.
        if let Some(dir) = &self.config.embedding_dir {
            let embedding_store = DirEmbeddingStore::new(dir);
            match average_embeddings(&after_checks, &embedding_store, &self.config.categories)
                .and_then(|results| {
                    export::write_embedding_summary(
                        &out.join("embedding_averages.csv"),
                        &roster,
                        ROSTER_KEY,
                        &results,
                    )
                }) {
                Ok(()) => {}
                Err(e) => error!("embedding aggregation failed, other exports kept: {e}"),
            }
        }

        Ok(summary)
    }
}

/// Convenience wrapper over [`QcPipeline`].
pub fn run_quality_control(config: QcConfig) -> Result<RunSummary, PipelineError> {
    QcPipeline::new(config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn main_trial(
        stimulus: u32,
        label: &str,
        key: u32,
        repeat: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "trial_type": "single-stim-rev-cor-trial",
            "stimulus": format!("src/images/main/{stimulus}.jpg"),
            "stimulus_number": stimulus,
            "response_label": label,
            "key_press": key,
            "repeat": repeat,
            "rt": 512,
            "seed": 9999999999999u64
        })
    }

    fn seed_database(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE Participant (worker_id TEXT, anon_id TEXT);
            INSERT INTO Participant VALUES ('w1', 'a-1');
            INSERT INTO Participant VALUES ('w2', 'a-2');
            CREATE TABLE Data (id INTEGER PRIMARY KEY, worker_id TEXT, condition TEXT, json_data TEXT);
            "#,
        )
        .unwrap();

        let w1_trials = serde_json::json!([
            {"trial_type": "fullscreen", "screen_width": 1920, "screen_height": 1080},
            {"trial_type": "render-mustache-template",
             "form_data": {"seriousness": "90", "issues": "none"}},
            main_trial(0, "MDD", 70, false),
            main_trial(1, "no MDD", 74, false),
            main_trial(2, "not sure", 32, false),
            main_trial(0, "MDD", 70, true),
            main_trial(1, "no MDD", 74, true),
        ]);
        let w2_trials = serde_json::json!([
            {"trial_type": "fullscreen", "screen_width": 700, "screen_height": 500},
            {"trial_type": "render-mustache-template",
             "form_data": {"seriousness": "95"}},
            main_trial(0, "MDD", 70, false),
            main_trial(0, "MDD", 70, true),
        ]);
        conn.execute(
            "INSERT INTO Data (worker_id, condition, json_data) VALUES (?1, 'A', ?2)",
            rusqlite::params!["w1", w1_trials.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO Data (worker_id, condition, json_data) VALUES (?1, 'A', ?2)",
            rusqlite::params!["w2", w2_trials.to_string()],
        )
        .unwrap();
    }

    fn seed_embeddings(dir: &std::path::Path) {
        std::fs::write(dir.join("0.json"), "[1.0, 0.0]").unwrap();
        std::fs::write(dir.join("1.json"), "[0.0, 1.0]").unwrap();
        std::fs::write(dir.join("2.json"), "[2.0, 2.0]").unwrap();
    }

    #[test]
    fn test_end_to_end_run() {
        let workdir = tempfile::tempdir().unwrap();
        let db_path = workdir.path().join("study.db");
        seed_database(&db_path);
        let embedding_dir = workdir.path().join("vectors");
        std::fs::create_dir_all(&embedding_dir).unwrap();
        seed_embeddings(&embedding_dir);
        let out = workdir.path().join("out");

        let summary = run_quality_control(
            QcConfig::new(&db_path, &out).with_embedding_dir(&embedding_dir),
        )
        .unwrap();

        // w2's 700x500 display fails the screen check; w1 survives all three.
        let names: Vec<&str> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "flattened",
                "after_screen_check",
                "after_engagement_check",
                "after_reliability_check"
            ]
        );
        assert_eq!(summary.stages[0].participants, 2);
        for pair in summary.stages.windows(2) {
            assert!(pair[1].participants <= pair[0].participants);
            assert!(pair[1].rows <= pair[0].rows);
        }
        assert_eq!(summary.stages[3].participants, 1);

        for file in [
            "Data.csv",
            "Participant.csv",
            "Data_expanded.csv",
            "data_expanded_after_screen.csv",
            "data_expanded_after_engagement.csv",
            "data_expanded_after_checks.csv",
            "participants_after_checks.csv",
            "data_after_checks.csv",
            "embedding_averages.csv",
        ] {
            assert!(out.join(file).exists(), "missing export {file}");
        }

        let survivors = std::fs::read_to_string(out.join("participants_after_checks.csv")).unwrap();
        assert!(survivors.contains("w1"));
        assert!(!survivors.contains("w2"));

        // The seed must round-trip as its exact digits in the flat export.
        let expanded = std::fs::read_to_string(out.join("Data_expanded.csv")).unwrap();
        assert!(expanded.contains("9999999999999"));

        // w1 answered all three categories, so the composite is defined:
        // pos [1,0] - neg [0,1] + unc [2,2] = [3,1], scalar mean 2.
        let averages = std::fs::read_to_string(out.join("embedding_averages.csv")).unwrap();
        assert!(averages.lines().any(|l| l.starts_with("w1,") && l.ends_with(",2")));
    }

    #[test]
    fn test_missing_database_is_fatal() {
        let workdir = tempfile::tempdir().unwrap();
        let config = QcConfig::new(
            workdir.path().join("absent.db"),
            workdir.path().join("out"),
        );
        assert!(QcPipeline::new(config).run().is_err());
    }
}
