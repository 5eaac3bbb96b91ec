//! At-risk alerts and rule-based recommendations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::FeatureTable;
use crate::preprocess::PreparedRow;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 50.0;
pub const ATTENDANCE_TARGET: f64 = 75.0;
pub const WEAK_SUBJECT_MARKS: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub student_id: String,
    /// The value the threshold was applied to: the prediction when one
    /// exists, otherwise the student's average marks.
    pub predicted_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub avg_marks: f64,
    pub avg_attendance: f64,
    pub recommendations: Vec<String>,
}

/// One alert for every student whose alert value is strictly below
/// `threshold`.
pub fn generate_alerts(table: &FeatureTable, threshold: f64) -> Vec<Alert> {
    table
        .rows
        .iter()
        .filter_map(|row| {
            let value = row.predicted_marks.unwrap_or(row.avg_marks);
            (value < threshold).then(|| Alert {
                student_id: row.student_id.clone(),
                predicted_marks: value,
            })
        })
        .collect()
}

fn marks_advice(avg_marks: f64) -> &'static str {
    if avg_marks < 50.0 {
        "Attend remedial classes and practice basics"
    } else if avg_marks < 70.0 {
        "Regular practice and revision recommended"
    } else {
        "Keep up the good work; try advanced problems"
    }
}

/// Builds advice from one student's performance rows. Returns `None` when
/// there are no rows.
pub fn personalized_recommendation<'a, I>(rows: I) -> Option<Recommendation>
where
    I: IntoIterator<Item = &'a PreparedRow>,
{
    let mut count = 0usize;
    let mut marks = 0.0;
    let mut attendance = 0.0;
    // subject -> (sum, count), in first-seen order
    let mut subjects: Vec<(String, f64, usize)> = Vec::new();

    for row in rows {
        count += 1;
        marks += row.marks;
        attendance += row.attendance;
        if let Some(subject) = &row.subject {
            match subjects.iter_mut().find(|(name, _, _)| name == subject) {
                Some(entry) => {
                    entry.1 += row.marks;
                    entry.2 += 1;
                }
                None => subjects.push((subject.clone(), row.marks, 1)),
            }
        }
    }

    if count == 0 {
        return None;
    }
    let avg_marks = marks / count as f64;
    let avg_attendance = attendance / count as f64;

    let mut recommendations = Vec::new();
    if avg_attendance < ATTENDANCE_TARGET {
        recommendations.push("Improve attendance to at least 75%".to_string());
    }
    recommendations.push(marks_advice(avg_marks).to_string());

    let weak: Vec<&str> = subjects
        .iter()
        .filter(|(_, sum, n)| sum / (*n as f64) < WEAK_SUBJECT_MARKS)
        .map(|(name, _, _)| name.as_str())
        .collect();
    if !weak.is_empty() {
        recommendations.push(format!("Weak subjects: {}", weak.join(", ")));
    }

    Some(Recommendation {
        avg_marks,
        avg_attendance,
        recommendations,
    })
}

/// Counts alerts per tier for summary views.
pub fn alert_tiers(alerts: &[Alert]) -> BTreeMap<&'static str, usize> {
    let mut tiers = BTreeMap::new();
    for alert in alerts {
        let tier = if alert.predicted_marks < 40.0 { "critical" } else { "warning" };
        *tiers.entry(tier).or_insert(0) += 1;
    }
    tiers
}
