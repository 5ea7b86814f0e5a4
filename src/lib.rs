//! trialsift - Quality-control pipeline for online behavioral-experiment data
//!
//! trialsift turns the raw submissions of an online study into a clean
//! analysis dataset through a deterministic pipeline: store load → trial
//! flattening → table assembly → participant exclusion filters (screen size,
//! engagement self-report, response reliability) → delimited exports. A
//! companion aggregator averages per-stimulus embedding vectors by response
//! category.
//!
//! The flattening stage enforces one invariant throughout: identifier-like
//! values (the `seed` field, numbers above 10^12, long digit strings) stay
//! exact text and never take a float round-trip.

pub mod embedding;
pub mod error;
pub mod export;
pub mod filters;
pub mod flatten;
pub mod pipeline;
pub mod store;
pub mod table;
pub mod types;

pub use embedding::{
    average_embeddings, CategoryMap, CategoryRules, DirEmbeddingStore, EmbeddingStore,
    ParticipantEmbedding, ResponseCategory,
};
pub use error::PipelineError;
pub use filters::reliability::{ReliabilityPolicy, ScoreThreshold};
pub use pipeline::{run_quality_control, QcConfig, QcPipeline, RunSummary, StageReport};
pub use store::{StudyStore, TableDump};
pub use table::Table;
pub use types::{RawRow, TrialRecord, TrialValue};

/// Crate version reported at the start of every run.
pub const TRIALSIFT_VERSION: &str = env!("CARGO_PKG_VERSION");
