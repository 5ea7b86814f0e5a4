//! Table assembly
//!
//! Collects flattened trial records into a single table whose column set is
//! the union of all fields seen across records. Assembly is an explicit two
//! passes: the first collects columns in first-seen order, the second
//! materializes rows with nulls for absent fields, keeping memory use and
//! column order deterministic.
//!
//! Only a small allow-list of timing columns is coerced to native numbers,
//! and only when every value in the column parses; identifier-like columns
//! are deliberately excluded so large ids never take a float round-trip.

use crate::types::{TrialRecord, TrialValue, COL_PARTICIPANT};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Columns eligible for whole-column numeric coercion.
pub const NUMERIC_COLUMNS: [&str; 3] = ["rt", "time_elapsed", "total_time"];

/// Ordered columns × rows; missing cells are `Null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<TrialValue>>,
}

impl Table {
    /// Assemble a table from flattened records.
    ///
    /// Pass one collects the column union in first-seen order; pass two
    /// materializes each record against that column set. The timing
    /// allow-list is then coerced column-wise.
    pub fn assemble(records: Vec<TrialRecord>) -> Table {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for record in &records {
            for (name, _) in record.iter() {
                if seen.insert(name.to_string()) {
                    columns.push(name.to_string());
                }
            }
        }

        let index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let mut row = vec![TrialValue::Null; columns.len()];
            for (name, value) in record.iter() {
                row[index[name]] = value.clone();
            }
            rows.push(row);
        }

        let mut table = Table { columns, rows };
        table.coerce_numeric_columns();
        table
    }

    /// Attempt whole-column numeric coercion for each allow-listed column.
    ///
    /// All-or-nothing per column: one unparseable non-null cell (or one
    /// protected digit string) abandons the column, leaving every cell as-is.
    fn coerce_numeric_columns(&mut self) {
        for name in NUMERIC_COLUMNS {
            let Some(col) = self.column_index(name) else {
                continue;
            };
            let mut coerced: Vec<Option<TrialValue>> = Vec::with_capacity(self.rows.len());
            let mut ok = true;
            for row in &self.rows {
                match &row[col] {
                    TrialValue::Null => coerced.push(None),
                    already @ TrialValue::Number(_) => coerced.push(Some(already.clone())),
                    cell => match cell
                        .as_f64()
                        .and_then(serde_json::Number::from_f64)
                    {
                        Some(n) => coerced.push(Some(TrialValue::Number(n))),
                        None => {
                            ok = false;
                            break;
                        }
                    },
                }
            }
            if !ok {
                debug!("leaving column {name} uncoerced");
                continue;
            }
            for (row, value) in self.rows.iter_mut().zip(coerced) {
                if let Some(v) = value {
                    row[col] = v;
                }
            }
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<TrialValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, column name); `None` when the column does not exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&TrialValue> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    /// Participant id of one row, when present and textual.
    pub fn participant_of(&self, row: usize) -> Option<&str> {
        self.value(row, COL_PARTICIPANT)?.as_str()
    }

    /// Unique participant ids in first-seen row order.
    pub fn participant_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in 0..self.rows.len() {
            if let Some(id) = self.participant_of(row) {
                if seen.insert(id.to_string()) {
                    out.push(id.to_string());
                }
            }
        }
        out
    }

    /// Participant ids as a set.
    pub fn participant_set(&self) -> HashSet<String> {
        self.participant_ids().into_iter().collect()
    }

    /// A new table containing only rows whose participant id is in `keep`.
    /// Filters can only remove participants, never add them.
    pub fn restrict_to(&self, keep: &HashSet<String>) -> Table {
        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                self.participant_of(*i)
                    .is_some_and(|id| keep.contains(id))
            })
            .map(|(_, row)| row.clone())
            .collect();
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrialRecord;
    use pretty_assertions::assert_eq;

    fn record(fields: &[(&str, TrialValue)]) -> TrialRecord {
        let mut r = TrialRecord::new();
        for (k, v) in fields {
            r.insert(*k, v.clone());
        }
        r
    }

    fn text(s: &str) -> TrialValue {
        TrialValue::Text(s.to_string())
    }

    fn num(s: &str) -> TrialValue {
        TrialValue::Number(serde_json::from_str(s).unwrap())
    }

    #[test]
    fn test_column_union_first_seen_order() {
        let table = Table::assemble(vec![
            record(&[(COL_PARTICIPANT, text("w1")), ("rt", num("500"))]),
            record(&[(COL_PARTICIPANT, text("w1")), ("stimulus", text("3.jpg"))]),
        ]);
        assert_eq!(table.columns(), &["participant_id", "rt", "stimulus"]);
        assert_eq!(table.value(0, "stimulus"), Some(&TrialValue::Null));
        assert_eq!(table.value(1, "rt"), Some(&TrialValue::Null));
    }

    #[test]
    fn test_numeric_column_coerced_when_clean() {
        let table = Table::assemble(vec![
            record(&[(COL_PARTICIPANT, text("w1")), ("rt", text("512"))]),
            record(&[(COL_PARTICIPANT, text("w1")), ("rt", num("433"))]),
        ]);
        assert_eq!(table.value(0, "rt").unwrap().as_f64(), Some(512.0));
        assert!(matches!(table.value(0, "rt"), Some(TrialValue::Number(_))));
    }

    #[test]
    fn test_numeric_coercion_abandoned_on_one_bad_cell() {
        let table = Table::assemble(vec![
            record(&[(COL_PARTICIPANT, text("w1")), ("rt", text("512"))]),
            record(&[(COL_PARTICIPANT, text("w1")), ("rt", text("n/a"))]),
        ]);
        // No partial coercion: the clean cell stays text too.
        assert_eq!(table.value(0, "rt"), Some(&text("512")));
        assert_eq!(table.value(1, "rt"), Some(&text("n/a")));
    }

    #[test]
    fn test_protected_digits_block_coercion() {
        let table = Table::assemble(vec![record(&[
            (COL_PARTICIPANT, text("w1")),
            ("total_time", text("123456789012345")),
        ])]);
        assert_eq!(
            table.value(0, "total_time"),
            Some(&text("123456789012345"))
        );
    }

    #[test]
    fn test_nulls_survive_coercion() {
        let table = Table::assemble(vec![
            record(&[(COL_PARTICIPANT, text("w1")), ("rt", num("100"))]),
            record(&[(COL_PARTICIPANT, text("w1")), ("stimulus", text("x"))]),
        ]);
        assert_eq!(table.value(1, "rt"), Some(&TrialValue::Null));
    }

    #[test]
    fn test_restrict_to_subset() {
        let table = Table::assemble(vec![
            record(&[(COL_PARTICIPANT, text("w1"))]),
            record(&[(COL_PARTICIPANT, text("w2"))]),
            record(&[(COL_PARTICIPANT, text("w1"))]),
        ]);
        let keep: std::collections::HashSet<_> = ["w1".to_string()].into();
        let restricted = table.restrict_to(&keep);
        assert_eq!(restricted.len(), 2);
        assert_eq!(restricted.participant_ids(), vec!["w1".to_string()]);
    }
}
