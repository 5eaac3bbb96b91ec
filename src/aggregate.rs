//! Per-student aggregation and incremental merging of aggregates.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::preprocess::PreparedBatch;
use crate::schema::EXTERNAL_ID;

pub const AVG_MARKS: &str = "avg_marks";
pub const AVG_ATTENDANCE: &str = "avg_attendance";
pub const AVG_ASSIGN_RATIO: &str = "avg_assign_ratio";
pub const PREDICTED_MARKS: &str = "predicted_marks";

/// One aggregated row per student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "enrollment_no")]
    pub student_id: String,
    pub avg_marks: f64,
    pub avg_attendance: f64,
    pub avg_assign_ratio: f64,
    /// Mean of each `sub_<subject>` indicator. A missing key is a null cell.
    #[serde(flatten)]
    pub subjects: BTreeMap<String, f64>,
    #[serde(default)]
    pub predicted_marks: Option<f64>,
}

impl FeatureVector {
    /// Looks a feature up by column name.
    pub fn feature(&self, column: &str) -> Option<f64> {
        match column {
            AVG_MARKS => Some(self.avg_marks),
            AVG_ATTENDANCE => Some(self.avg_attendance),
            AVG_ASSIGN_RATIO => Some(self.avg_assign_ratio),
            PREDICTED_MARKS => self.predicted_marks,
            other => self.subjects.get(other).copied(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub subject_columns: Vec<String>,
    pub rows: Vec<FeatureVector>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, student_id: &str) -> Option<&FeatureVector> {
        self.rows.iter().find(|r| r.student_id == student_id)
    }

    /// Every numeric column except the target, in training order.
    pub fn feature_columns(&self) -> Vec<String> {
        [AVG_ATTENDANCE, AVG_ASSIGN_RATIO]
            .iter()
            .map(|c| c.to_string())
            .chain(self.subject_columns.iter().cloned())
            .collect()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.avg_marks).collect()
    }

    /// Builds a matrix with exactly `columns`, in that order. Columns the
    /// table does not carry, and null cells, are filled with 0.
    pub fn matrix(&self, columns: &[String]) -> Array2<f64> {
        Array2::from_shape_fn((self.rows.len(), columns.len()), |(i, j)| {
            self.rows[i].feature(&columns[j]).unwrap_or(0.0)
        })
    }
}

impl FeatureTable {
    /// Writes one CSV line per student: id, averages, every subject column,
    /// then the prediction. Null cells are left empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec![EXTERNAL_ID, AVG_MARKS, AVG_ATTENDANCE, AVG_ASSIGN_RATIO];
        header.extend(self.subject_columns.iter().map(String::as_str));
        header.push(PREDICTED_MARKS);
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                row.student_id.clone(),
                row.avg_marks.to_string(),
                row.avg_attendance.to_string(),
                row.avg_assign_ratio.to_string(),
            ];
            for column in &self.subject_columns {
                record.push(row.feature(column).map(|v| v.to_string()).unwrap_or_default());
            }
            record.push(row.predicted_marks.map(|v| v.to_string()).unwrap_or_default());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[derive(Default)]
struct Accumulator {
    rows: usize,
    marks: f64,
    attendance: f64,
    assign_ratio: f64,
    indicators: Vec<f64>,
}

/// Collapses prepared rows into one feature vector per student, sorted by
/// student id.
pub fn aggregate(batch: &PreparedBatch) -> FeatureTable {
    let width = batch.subject_columns.len();
    let mut groups: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for row in &batch.rows {
        let acc = groups.entry(row.student_id.as_str()).or_insert_with(|| Accumulator {
            indicators: vec![0.0; width],
            ..Default::default()
        });
        acc.rows += 1;
        acc.marks += row.marks;
        acc.attendance += row.attendance;
        acc.assign_ratio += row.assign_ratio;
        for (sum, value) in acc.indicators.iter_mut().zip(&row.indicators) {
            *sum += value;
        }
    }

    let rows: Vec<FeatureVector> = groups
        .into_iter()
        .map(|(student_id, acc)| {
            let n = acc.rows as f64;
            FeatureVector {
                student_id: student_id.to_string(),
                avg_marks: acc.marks / n,
                avg_attendance: acc.attendance / n,
                avg_assign_ratio: acc.assign_ratio / n,
                subjects: batch
                    .subject_columns
                    .iter()
                    .cloned()
                    .zip(acc.indicators.iter().map(|sum| sum / n))
                    .collect(),
                predicted_marks: None,
            }
        })
        .collect();

    debug!(students = rows.len(), "Aggregated student features");
    FeatureTable {
        subject_columns: batch.subject_columns.clone(),
        rows,
    }
}

/// Outer-joins `incoming` into `existing`. For a student on both sides the
/// incoming value wins wherever it is non-null.
pub fn merge(existing: FeatureTable, incoming: FeatureTable) -> FeatureTable {
    let subject_columns: Vec<String> = existing
        .subject_columns
        .iter()
        .chain(&incoming.subject_columns)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut merged: BTreeMap<String, FeatureVector> = existing
        .rows
        .into_iter()
        .map(|row| (row.student_id.clone(), row))
        .collect();

    let mut updated = 0usize;
    for new in incoming.rows {
        match merged.get_mut(&new.student_id) {
            Some(old) => {
                old.avg_marks = new.avg_marks;
                old.avg_attendance = new.avg_attendance;
                old.avg_assign_ratio = new.avg_assign_ratio;
                old.subjects.extend(new.subjects);
                if new.predicted_marks.is_some() {
                    old.predicted_marks = new.predicted_marks;
                }
                updated += 1;
            }
            None => {
                merged.insert(new.student_id.clone(), new);
            }
        }
    }

    debug!(students = merged.len(), updated, "Merged aggregates");
    FeatureTable {
        subject_columns,
        rows: merged.into_values().collect(),
    }
}
