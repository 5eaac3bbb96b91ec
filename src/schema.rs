//! Schema normalization: identifier aliasing and subject cleanup.

use tracing::{debug, warn};

use crate::data::{Cell, RawRow, RawTable};
use crate::error::{PipelineError, Result};

/// Identifier name used inside the pipeline.
pub const CANONICAL_ID: &str = "student_id";
/// Identifier name exposed to callers of aggregated output.
pub const EXTERNAL_ID: &str = "enrollment_no";
/// Accepted identifier columns, highest priority first.
pub const ID_ALIASES: [&str; 3] = [CANONICAL_ID, EXTERNAL_ID, "enrollment"];
/// Subject assigned to rows with a blank subject.
pub const DEFAULT_SUBJECT: &str = "general";

pub const SUBJECT: &str = "subject";
pub const MARKS: &str = "marks";
pub const ATTENDANCE: &str = "attendance";
pub const ASSIGNMENTS_COMPLETED: &str = "assignments_completed";
pub const ASSIGNMENTS_TOTAL: &str = "assignments_total";

/// One input row after normalization. Values are still optional here.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: String,
    pub subject: Option<String>,
    pub marks: Option<f64>,
    pub attendance: Option<f64>,
    pub assignments_completed: Option<f64>,
    pub assignments_total: Option<f64>,
}

/// Which optional columns the source batch carried at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnPresence {
    pub subject: bool,
    pub marks: bool,
    pub attendance: bool,
    pub assignments: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    /// Alias the identifier was read from.
    pub id_source: &'static str,
    pub columns: ColumnPresence,
    pub records: Vec<StudentRecord>,
}

impl NormalizedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Picks the identifier column by alias priority.
pub fn resolve_id_column(table: &RawTable) -> Result<&'static str> {
    ID_ALIASES
        .iter()
        .copied()
        .find(|alias| table.has_column(alias))
        .ok_or_else(PipelineError::missing_student_id)
}

pub fn normalize_subject(raw: Option<&Cell>) -> String {
    raw.and_then(Cell::as_text)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string())
}

fn numeric(row: &RawRow, column: &str) -> Option<f64> {
    row.get(column).and_then(Cell::as_f64)
}

/// Maps a raw batch onto the canonical schema. Fails without producing
/// anything when no identifier alias is present.
pub fn normalize(table: &RawTable) -> Result<NormalizedBatch> {
    let id_source = resolve_id_column(table)?;
    let columns = ColumnPresence {
        subject: table.has_column(SUBJECT),
        marks: table.has_column(MARKS),
        attendance: table.has_column(ATTENDANCE),
        assignments: table.has_column(ASSIGNMENTS_COMPLETED) && table.has_column(ASSIGNMENTS_TOTAL),
    };

    let mut records = Vec::with_capacity(table.len());
    let mut missing_ids = 0usize;
    for row in table.rows() {
        let Some(student_id) = row.get(id_source).and_then(Cell::as_text) else {
            missing_ids += 1;
            continue;
        };
        records.push(StudentRecord {
            student_id,
            subject: columns.subject.then(|| normalize_subject(row.get(SUBJECT))),
            marks: numeric(row, MARKS),
            attendance: numeric(row, ATTENDANCE),
            assignments_completed: numeric(row, ASSIGNMENTS_COMPLETED),
            assignments_total: numeric(row, ASSIGNMENTS_TOTAL),
        });
    }

    if missing_ids > 0 {
        warn!(rows = missing_ids, column = id_source, "Skipped rows without a student id");
    }
    debug!(id_source, records = records.len(), "Normalized batch");

    Ok(NormalizedBatch {
        id_source,
        columns,
        records,
    })
}
