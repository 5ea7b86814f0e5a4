//! Participant-level quality-control filters
//!
//! Applied in strict sequence: screen size → engagement self-report →
//! response reliability. Each filter consumes a table and returns the same
//! table restricted to passing participants, so the surviving participant
//! set can only shrink across the pipeline.

pub mod engagement;
pub mod reliability;
pub mod screen;
