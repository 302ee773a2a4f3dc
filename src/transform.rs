use crate::error::TransformError;
use crate::models::{DetailRow, LineStatus, RunDetails, RunRecord};
use serde_json::Value;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub const QUESTION_COLUMN: &str = "inputs.question";
pub const CHAT_HISTORY_COLUMN: &str = "inputs.chat_history";
pub const ANSWER_COLUMN: &str = "outputs.answer";
pub const CONTEXT_COLUMN: &str = "outputs.context";

/// Outcome of writing the evaluation input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSummary {
    /// Lines written
    pub written: usize,
    /// Failed flow lines left out of the file
    pub skipped_failed: usize,
}

/// Convert completed run rows into evaluator records, in row order.
///
/// Failed rows are skipped and counted; a completed row missing one of the
/// four columns is an error.
pub fn extract_records(details: &RunDetails) -> Result<(Vec<RunRecord>, usize), TransformError> {
    let mut records = Vec::with_capacity(details.len());
    let mut skipped = 0;

    for row in &details.rows {
        if row.status == LineStatus::Failed {
            skipped += 1;
            continue;
        }
        records.push(record_from_row(row)?);
    }

    Ok((records, skipped))
}

fn record_from_row(row: &DetailRow) -> Result<RunRecord, TransformError> {
    let chat_history = match column(row, CHAT_HISTORY_COLUMN)? {
        Value::Array(turns) => turns.clone(),
        Value::Null => Vec::new(),
        other => {
            return Err(TransformError::InvalidColumn {
                column: CHAT_HISTORY_COLUMN,
                line: row.line_number,
                message: format!("expected an array, found {}", other),
            });
        }
    };

    Ok(RunRecord {
        question: text_column(row, QUESTION_COLUMN)?,
        chat_history,
        answer: text_column(row, ANSWER_COLUMN)?,
        context: text_column(row, CONTEXT_COLUMN)?,
    })
}

fn column<'a>(row: &'a DetailRow, name: &'static str) -> Result<&'a Value, TransformError> {
    row.get(name).ok_or(TransformError::MissingColumn {
        column: name,
        line: row.line_number,
    })
}

fn text_column(row: &DetailRow, name: &'static str) -> Result<String, TransformError> {
    match column(row, name)? {
        Value::String(text) => Ok(text.clone()),
        other => Err(TransformError::InvalidColumn {
            column: name,
            line: row.line_number,
            message: format!("expected a string, found {}", other),
        }),
    }
}

/// Write one JSON object per line, replacing any previous content
pub fn write_jsonl(records: &[RunRecord], path: &Path) -> Result<(), TransformError> {
    let write_error = |source: std::io::Error| TransformError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }

    let file = std::fs::File::create(path).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n").map_err(write_error)?;
    }
    writer.flush().map_err(write_error)?;
    Ok(())
}

/// Extract records from `details` and write them to `path`
pub fn write_responses(details: &RunDetails, path: &Path) -> Result<TransformSummary, TransformError> {
    let (records, skipped_failed) = extract_records(details)?;
    if skipped_failed > 0 {
        warn!(
            skipped = skipped_failed,
            "Leaving failed flow lines out of the evaluation data"
        );
    }

    write_jsonl(&records, path)?;
    info!(records = records.len(), path = %path.display(), "Wrote evaluation data");

    Ok(TransformSummary {
        written: records.len(),
        skipped_failed,
    })
}
