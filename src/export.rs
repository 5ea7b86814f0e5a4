//! Delimited file export
//!
//! Every intermediate and final table is written as a UTF-8 comma-delimited
//! file with a header row. Cells are quoted only when they contain a comma,
//! quote, or line break (quotes doubled), so identifier cells round-trip as
//! the exact text the earlier stages preserved.

use crate::embedding::ParticipantEmbedding;
use crate::error::PipelineError;
use crate::store::TableDump;
use crate::table::Table;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Write header plus rows of already-rendered cells.
pub fn write_delimited<I>(path: &Path, headers: &[String], rows: I) -> Result<(), PipelineError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut out = BufWriter::new(File::create(path)?);
    write_record(&mut out, headers.iter().map(String::as_str))?;
    let mut count = 0usize;
    for row in rows {
        write_record(&mut out, row.iter().map(String::as_str))?;
        count += 1;
    }
    out.flush()?;
    info!("wrote {} rows to {}", count, path.display());
    Ok(())
}

/// Export a flattened table; `Null` cells render empty.
pub fn write_table(path: &Path, table: &Table) -> Result<(), PipelineError> {
    write_delimited(
        path,
        table.columns(),
        table
            .rows()
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect()),
    )
}

/// Export a raw store dump.
pub fn write_dump(path: &Path, dump: &TableDump) -> Result<(), PipelineError> {
    write_delimited(path, &dump.headers, dump.rows.iter().cloned())
}

/// Export the aggregator summary joined with the participant roster.
///
/// Columns are the roster's columns plus `composite_score`. Participants
/// missing from the roster still get a row carrying just their id and score;
/// an undefined composite renders as an empty cell.
pub fn write_embedding_summary(
    path: &Path,
    roster: &TableDump,
    roster_key: &str,
    results: &[ParticipantEmbedding],
) -> Result<(), PipelineError> {
    let key = roster
        .column_index(roster_key)
        .ok_or_else(|| PipelineError::MissingColumn(roster_key.to_string()))?;
    let mut headers = roster.headers.clone();
    headers.push("composite_score".to_string());

    let rows = results.iter().map(|result| {
        let mut row = match roster
            .rows
            .iter()
            .find(|r| r[key] == result.participant_id)
        {
            Some(r) => r.clone(),
            None => {
                let mut blank = vec![String::new(); roster.headers.len()];
                blank[key] = result.participant_id.clone();
                blank
            }
        };
        row.push(
            result
                .composite
                .map(|c| c.to_string())
                .unwrap_or_default(),
        );
        row
    });
    write_delimited(path, &headers, rows)
}

fn write_record<'a, W: Write>(
    out: &mut W,
    cells: impl Iterator<Item = &'a str>,
) -> Result<(), PipelineError> {
    let mut first = true;
    for cell in cells {
        if !first {
            out.write_all(b",")?;
        }
        first = false;
        if needs_quoting(cell) {
            out.write_all(b"\"")?;
            out.write_all(cell.replace('"', "\"\"").as_bytes())?;
            out.write_all(b"\"")?;
        } else {
            out.write_all(cell.as_bytes())?;
        }
    }
    out.write_all(b"\n")?;
    Ok(())
}

fn needs_quoting(cell: &str) -> bool {
    cell.contains([',', '"', '\n', '\r'])
}
