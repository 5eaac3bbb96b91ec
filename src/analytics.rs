use serde::Serialize;
use std::collections::BTreeMap;

use crate::aggregate::FeatureTable;
use crate::alerts::{alert_tiers, generate_alerts};
use crate::preprocess::PreparedRow;

/// Histogram bin edges for average marks.
pub const MARK_BINS: [f64; 8] = [0.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ClassSummary {
    pub total_students: usize,
    pub avg_marks: f64,
    pub avg_attendance: f64,
    pub at_risk_students: usize,
    pub alert_tiers: BTreeMap<&'static str, usize>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct MarksDistribution {
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
    pub total_students: usize,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AttendanceCorrelation {
    pub students: Vec<String>,
    pub attendance: Vec<f64>,
    pub marks: Vec<f64>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PredictionComparison {
    pub students: Vec<String>,
    pub actual_marks: Vec<f64>,
    pub predicted_marks: Vec<f64>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SubjectPerformance {
    pub subjects: Vec<String>,
    pub avg_marks: Vec<f64>,
    pub avg_attendance: Vec<f64>,
}

// Charts without data are left out of the payload
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct DashboardData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ClassSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks_distribution: Option<MarksDistribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_correlation: Option<AttendanceCorrelation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_prediction: Option<PredictionComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_performance: Option<SubjectPerformance>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

pub struct DashboardAnalyzer {
    alert_threshold: f64,
}

impl DashboardAnalyzer {
    pub fn new(alert_threshold: f64) -> Self {
        DashboardAnalyzer { alert_threshold }
    }

    pub fn class_summary(&self, students: &FeatureTable) -> Option<ClassSummary> {
        if students.is_empty() {
            return None;
        }
        let alerts = generate_alerts(students, self.alert_threshold);
        Some(ClassSummary {
            total_students: students.len(),
            avg_marks: round2(mean(students.rows.iter().map(|r| r.avg_marks))),
            avg_attendance: round2(mean(students.rows.iter().map(|r| r.avg_attendance))),
            at_risk_students: alerts.len(),
            alert_tiers: alert_tiers(&alerts),
        })
    }

    /// Counts per bin; bins are half-open except the last, which includes 100.
    pub fn marks_distribution(&self, students: &FeatureTable) -> Option<MarksDistribution> {
        if students.is_empty() {
            return None;
        }
        let last = MARK_BINS.len() - 2;
        let mut counts = vec![0usize; MARK_BINS.len() - 1];
        for marks in students.rows.iter().map(|r| r.avg_marks) {
            let bin = MARK_BINS.windows(2).enumerate().position(|(i, edge)| {
                marks >= edge[0] && (marks < edge[1] || (i == last && marks <= edge[1]))
            });
            if let Some(bin) = bin {
                counts[bin] += 1;
            }
        }
        let labels = MARK_BINS
            .windows(2)
            .map(|edge| format!("{}-{}", edge[0] as i64, edge[1] as i64))
            .collect();
        Some(MarksDistribution {
            labels,
            counts,
            total_students: students.len(),
        })
    }

    pub fn attendance_correlation(&self, students: &FeatureTable) -> Option<AttendanceCorrelation> {
        if students.is_empty() {
            return None;
        }
        Some(AttendanceCorrelation {
            students: students.rows.iter().map(|r| r.student_id.clone()).collect(),
            attendance: students.rows.iter().map(|r| r.avg_attendance).collect(),
            marks: students.rows.iter().map(|r| r.avg_marks).collect(),
        })
    }

    /// Actual against predicted marks. Students without a prediction show
    /// their actual marks on both series.
    pub fn prediction_comparison(&self, students: &FeatureTable) -> Option<PredictionComparison> {
        if students.is_empty() {
            return None;
        }
        Some(PredictionComparison {
            students: students.rows.iter().map(|r| r.student_id.clone()).collect(),
            actual_marks: students.rows.iter().map(|r| r.avg_marks).collect(),
            predicted_marks: students
                .rows
                .iter()
                .map(|r| r.predicted_marks.unwrap_or(r.avg_marks))
                .collect(),
        })
    }

    pub fn subject_performance(&self, rows: &[PreparedRow]) -> Option<SubjectPerformance> {
        let mut by_subject: BTreeMap<&str, (f64, f64, usize)> = BTreeMap::new();
        for row in rows {
            if let Some(subject) = row.subject.as_deref() {
                let entry = by_subject.entry(subject).or_insert((0.0, 0.0, 0));
                entry.0 += row.marks;
                entry.1 += row.attendance;
                entry.2 += 1;
            }
        }
        if by_subject.is_empty() {
            return None;
        }

        let mut chart = SubjectPerformance {
            subjects: Vec::new(),
            avg_marks: Vec::new(),
            avg_attendance: Vec::new(),
        };
        for (subject, (marks, attendance, n)) in by_subject {
            chart.subjects.push(subject.to_string());
            chart.avg_marks.push(round2(marks / n as f64));
            chart.avg_attendance.push(round2(attendance / n as f64));
        }
        Some(chart)
    }

    pub fn generate_dashboard(&self, students: &FeatureTable, rows: &[PreparedRow]) -> DashboardData {
        DashboardData {
            summary: self.class_summary(students),
            marks_distribution: self.marks_distribution(students),
            attendance_correlation: self.attendance_correlation(students),
            performance_prediction: self.prediction_comparison(students),
            subject_performance: self.subject_performance(rows),
        }
    }
}
