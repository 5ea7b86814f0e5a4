//! Screen-size filter
//!
//! A participant passes when at least one of their fullscreen-check trials
//! reports a display of at least 800×600. Participants with no usable
//! fullscreen-check trial are excluded. Re-applying the filter to its own
//! output changes nothing.

use crate::table::Table;
use std::collections::HashSet;
use tracing::info;

/// Trial-type marker of the fullscreen check.
pub const FULLSCREEN_TRIAL_TYPE: &str = "fullscreen";

/// Minimum acceptable display width, in pixels.
pub const MIN_SCREEN_WIDTH: f64 = 800.0;
/// Minimum acceptable display height, in pixels.
pub const MIN_SCREEN_HEIGHT: f64 = 600.0;

/// Restrict the table to participants with an adequate display.
pub fn apply(table: &Table) -> Table {
    let passed = passing_participants(table);
    let filtered = table.restrict_to(&passed);
    info!(
        "screen-size filter: {} -> {} rows, {} participants pass",
        table.len(),
        filtered.len(),
        passed.len()
    );
    filtered
}

/// Participants with at least one fullscreen-check row meeting the minimum.
///
/// Width and height are coerced on read; a row where either is missing or
/// non-numeric drops out of consideration without affecting other rows.
fn passing_participants(table: &Table) -> HashSet<String> {
    let mut passed = HashSet::new();
    for row in 0..table.len() {
        let is_check = table
            .value(row, "trial_type")
            .and_then(|v| v.as_str())
            .is_some_and(|t| t == FULLSCREEN_TRIAL_TYPE);
        if !is_check {
            continue;
        }
        let width = table.value(row, "screen_width").and_then(|v| v.as_f64());
        let height = table.value(row, "screen_height").and_then(|v| v.as_f64());
        if let (Some(w), Some(h)) = (width, height) {
            if w >= MIN_SCREEN_WIDTH && h >= MIN_SCREEN_HEIGHT {
                if let Some(id) = table.participant_of(row) {
                    passed.insert(id.to_string());
                }
            }
        }
    }
    passed
}
