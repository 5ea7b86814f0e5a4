//! SQLite input store
//!
//! The study database holds two tables: `Participant` (one row per
//! participant, arbitrary attribute columns) and `Data` (one row per
//! submission, with the trial blob in a text column). Everything is read in
//! one bulk pass per table; connection and query errors are fatal.
//!
//! Generic dumps render every cell as text. Integers are rendered from their
//! stored digits, so identifier columns round-trip exactly in exports.

use crate::error::PipelineError;
use crate::types::RawRow;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Read-only handle on the study database.
pub struct StudyStore {
    conn: Connection,
}

/// A whole table rendered to text: header row plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDump {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableDump {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Restrict rows to those whose `key_column` value is in `keep`.
    pub fn restrict_by(
        &self,
        key_column: &str,
        keep: &HashSet<String>,
    ) -> Result<TableDump, PipelineError> {
        let key = self
            .column_index(key_column)
            .ok_or_else(|| PipelineError::MissingColumn(key_column.to_string()))?;
        Ok(TableDump {
            headers: self.headers.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| keep.contains(&row[key]))
                .cloned()
                .collect(),
        })
    }
}

impl StudyStore {
    /// Open the database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection (used by tests with in-memory databases).
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Bulk-load the `Data` table into raw rows for flattening.
    pub fn load_raw_rows(&self) -> Result<Vec<RawRow>, PipelineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT worker_id, condition, id, json_data FROM Data")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    participant_id: text_cell(row.get_ref(0)?),
                    condition: text_cell(row.get_ref(1)?),
                    row_id: text_cell(row.get_ref(2)?),
                    json_blob: match row.get_ref(3)? {
                        ValueRef::Null => None,
                        other => Some(text_cell(other)),
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        info!("loaded {} submission rows from Data", rows.len());
        Ok(rows)
    }

    /// Render an entire table as text, preserving column order.
    pub fn dump_table(&self, table: &str) -> Result<TableDump, PipelineError> {
        // Table names come from our own two-table schema, not user input.
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {table}"))?;
        let headers: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = headers.len();
        let rows = stmt
            .query_map([], |row| {
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    cells.push(text_cell(row.get_ref(i)?));
                }
                Ok(cells)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TableDump { headers, rows })
    }

    /// Dump of the participant roster.
    pub fn load_participants(&self) -> Result<TableDump, PipelineError> {
        self.dump_table("Participant")
    }
}

/// Render one SQLite cell as text. Integers keep their exact stored digits.
fn text_cell(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(r) => r.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(_) => String::new(),
    }
}
