//! Feature preprocessing: missing-value filling, assignment ratio and
//! subject indicator expansion.

use std::collections::BTreeSet;

use tracing::debug;

use crate::schema::{NormalizedBatch, StudentRecord};

pub const SUBJECT_PREFIX: &str = "sub_";

pub fn subject_column(subject: &str) -> String {
    format!("{}{}", SUBJECT_PREFIX, subject)
}

/// One fully numeric input row.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    pub student_id: String,
    pub subject: Option<String>,
    pub marks: f64,
    pub attendance: f64,
    pub assign_ratio: f64,
    /// Aligned with `PreparedBatch::subject_columns`.
    pub indicators: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBatch {
    /// `sub_<subject>` columns, sorted. Depends on the batch contents.
    pub subject_columns: Vec<String>,
    pub rows: Vec<PreparedRow>,
}

/// Value used for missing cells of a column: the batch mean of the present
/// values, or 0 when the column is absent or has no values at all.
fn fill_value(present: bool, values: impl Iterator<Item = Option<f64>>) -> f64 {
    if !present {
        return 0.0;
    }
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn assign_ratio(record: &StudentRecord, present: bool) -> f64 {
    if !present {
        return 0.0;
    }
    match (record.assignments_completed, record.assignments_total) {
        (Some(done), Some(total)) => {
            let total = if total == 0.0 { 1.0 } else { total };
            done / total
        }
        _ => 0.0,
    }
}

pub fn preprocess(batch: &NormalizedBatch) -> PreparedBatch {
    let records = &batch.records;
    let marks_fill = fill_value(batch.columns.marks, records.iter().map(|r| r.marks));
    let attendance_fill = fill_value(batch.columns.attendance, records.iter().map(|r| r.attendance));

    let subjects: BTreeSet<&str> = records.iter().filter_map(|r| r.subject.as_deref()).collect();
    let subject_columns: Vec<String> = subjects.iter().map(|s| subject_column(s)).collect();

    let rows = records
        .iter()
        .map(|record| {
            let indicators = subjects
                .iter()
                .map(|s| if record.subject.as_deref() == Some(*s) { 1.0 } else { 0.0 })
                .collect();
            PreparedRow {
                student_id: record.student_id.clone(),
                subject: record.subject.clone(),
                marks: record.marks.unwrap_or(marks_fill),
                attendance: record.attendance.unwrap_or(attendance_fill),
                assign_ratio: assign_ratio(record, batch.columns.assignments),
                indicators,
            }
        })
        .collect::<Vec<_>>();

    debug!(rows = rows.len(), subjects = subject_columns.len(), "Preprocessed batch");
    PreparedBatch { subject_columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawTable;
    use crate::schema::normalize;

    fn prepare(csv: &str) -> PreparedBatch {
        let table = RawTable::from_csv_reader(csv.as_bytes()).unwrap();
        preprocess(&normalize(&table).unwrap())
    }

    #[test]
    fn missing_values_use_batch_mean() {
        let batch = prepare("student_id,marks,attendance\nS1,40,80\nS2,,60\nS3,80,\n");
        assert_eq!(batch.rows[1].marks, 60.0);
        assert_eq!(batch.rows[2].attendance, 70.0);
    }

    #[test]
    fn absent_columns_become_zero() {
        let batch = prepare("student_id\nS1\nS2\n");
        for row in &batch.rows {
            assert_eq!(row.marks, 0.0);
            assert_eq!(row.attendance, 0.0);
            assert_eq!(row.assign_ratio, 0.0);
        }
    }

    #[test]
    fn all_null_column_becomes_zero() {
        let batch = prepare("student_id,marks\nS1,\nS2,n/a\n");
        assert!(batch.rows.iter().all(|r| r.marks == 0.0));
    }

    #[test]
    fn assignment_ratio_treats_zero_total_as_one() {
        let batch = prepare(
            "student_id,assignments_completed,assignments_total\nS1,3,4\nS2,2,0\nS3,,5\n",
        );
        assert_eq!(batch.rows[0].assign_ratio, 0.75);
        assert_eq!(batch.rows[1].assign_ratio, 2.0);
        assert_eq!(batch.rows[2].assign_ratio, 0.0);
    }

    #[test]
    fn subjects_expand_to_sorted_indicators() {
        let batch = prepare("student_id,subject\nS1,Science\nS1,math\nS2,\n");
        assert_eq!(batch.subject_columns, ["sub_general", "sub_math", "sub_science"]);
        assert_eq!(batch.rows[0].indicators, [0.0, 0.0, 1.0]);
        assert_eq!(batch.rows[1].indicators, [0.0, 1.0, 0.0]);
        assert_eq!(batch.rows[2].indicators, [1.0, 0.0, 0.0]);
    }
}
