use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use student_performance::aggregate::merge;
use student_performance::alerts::generate_alerts;
use student_performance::forest::ForestParams;
use student_performance::model::{predict_for_aggregated, train_model};
use student_performance::pipeline::{aggregate_student_features, build_features, predict_from_raw, train_from_raw};
use student_performance::{Cell, ModelStore, PipelineError, RawTable, TrainOutcome, TrainingConfig};

const IDS: [&str; 4] = ["S1", "S2", "S3", "S4"];
const SUBJECTS: [&str; 4] = ["Math", "science", " ART ", ""];

fn record(id: &str, subject: &str, marks: f64, attendance: f64) -> BTreeMap<String, Cell> {
    BTreeMap::from([
        ("student_id".to_string(), Cell::from(id)),
        ("subject".to_string(), Cell::from(subject)),
        ("marks".to_string(), Cell::from(marks)),
        ("attendance".to_string(), Cell::from(attendance)),
    ])
}

fn class_batch() -> RawTable {
    RawTable::from_rows(vec![
        record("S1", "Math", 40.0, 60.0),
        record("S1", "Science", 80.0, 90.0),
        record("S2", "Math", 35.0, 50.0),
        record("S2", "Science", 45.0, 55.0),
        record("S3", "Math", 70.0, 85.0),
        record("S3", "Science", 75.0, 80.0),
        record("S4", "Math", 90.0, 95.0),
        record("S5", "Science", 55.0, 70.0),
        record("S6", "Math", 62.0, 78.0),
    ])
}

fn quick_config() -> TrainingConfig {
    TrainingConfig {
        forest: ForestParams::default().n_trees(25),
        ..Default::default()
    }
}

type GeneratedRow = (usize, usize, Option<f64>, Option<f64>);

fn generated_table(rows: &[GeneratedRow]) -> RawTable {
    let columns = ["student_id", "subject", "marks", "attendance"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let rows = rows
        .iter()
        .map(|(id, subject, marks, attendance)| {
            BTreeMap::from([
                ("student_id".to_string(), Cell::from(IDS[*id])),
                ("subject".to_string(), Cell::from(SUBJECTS[*subject])),
                ("marks".to_string(), marks.map_or(Cell::Null, Cell::Number)),
                ("attendance".to_string(), attendance.map_or(Cell::Null, Cell::Number)),
            ])
        })
        .collect();
    RawTable::with_columns(columns, rows)
}

fn row_strategy() -> impl Strategy<Value = GeneratedRow> {
    (
        0..IDS.len(),
        0..SUBJECTS.len(),
        prop::option::of(0.0..100.0f64),
        prop::option::of(0.0..100.0f64),
    )
}

proptest! {
    #[test]
    fn aggregation_is_idempotent(rows in prop::collection::vec(row_strategy(), 1..30)) {
        let table = generated_table(&rows);
        prop_assert_eq!(build_features(&table).unwrap(), build_features(&table).unwrap());
    }

    #[test]
    fn every_input_student_appears_once(rows in prop::collection::vec(row_strategy(), 1..30)) {
        let table = generated_table(&rows);
        let expected: BTreeSet<String> = rows.iter().map(|r| IDS[r.0].to_string()).collect();
        let students = aggregate_student_features(&table).unwrap();
        let ids: Vec<String> = students.rows.iter().map(|r| r.student_id.clone()).collect();
        prop_assert_eq!(ids.len(), expected.len());
        prop_assert_eq!(ids.into_iter().collect::<BTreeSet<_>>(), expected);
    }

    #[test]
    fn incoming_values_win_on_merge(
        old_rows in prop::collection::vec(row_strategy(), 1..20),
        new_rows in prop::collection::vec(row_strategy(), 1..20),
    ) {
        let old = aggregate_student_features(&generated_table(&old_rows)).unwrap();
        let new = aggregate_student_features(&generated_table(&new_rows)).unwrap();
        let merged = merge(old.clone(), new.clone());

        for row in &merged.rows {
            match (new.get(&row.student_id), old.get(&row.student_id)) {
                (Some(n), _) => {
                    prop_assert_eq!(row.avg_marks, n.avg_marks);
                    prop_assert_eq!(row.avg_attendance, n.avg_attendance);
                    for (column, value) in &n.subjects {
                        prop_assert_eq!(row.subjects.get(column), Some(value));
                    }
                }
                (None, Some(o)) => {
                    prop_assert_eq!(row, o);
                }
                (None, None) => {
                    prop_assert!(false, "merge invented {}", row.student_id);
                }
            }
        }
    }
}

#[test]
fn scenario_two_subjects_one_student() {
    let table = RawTable::from_rows(vec![
        record("S1", "Math", 40.0, 60.0),
        record("S1", "Science", 80.0, 90.0),
    ]);
    let students = aggregate_student_features(&table).unwrap();
    assert_eq!(students.len(), 1);
    let s1 = &students.rows[0];
    assert_eq!(s1.avg_marks, 60.0);
    assert_eq!(s1.avg_attendance, 75.0);

    assert!(generate_alerts(&students, 50.0).is_empty());
    let alerts = generate_alerts(&students, 65.0);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].student_id, "S1");
    assert_eq!(alerts[0].predicted_marks, 60.0);
}

#[test]
fn absent_columns_aggregate_to_zero() {
    let table = RawTable::from_rows(vec![
        BTreeMap::from([("enrollment".to_string(), Cell::from("E1"))]),
        BTreeMap::from([("enrollment".to_string(), Cell::from("E2"))]),
    ]);
    let students = aggregate_student_features(&table).unwrap();
    for row in &students.rows {
        assert_eq!(row.avg_marks, 0.0);
        assert_eq!(row.avg_attendance, 0.0);
        assert_eq!(row.avg_assign_ratio, 0.0);
    }
}

#[test]
fn missing_identifier_aborts_the_batch() {
    let table = RawTable::from_rows(vec![BTreeMap::from([("marks".to_string(), Cell::from(50.0))])]);
    assert!(matches!(build_features(&table), Err(PipelineError::Schema(_))));
}

#[test]
fn train_then_predict_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path().join("models").join("rf_model.json"));

    let outcome = train_from_raw(&class_batch(), &store, &quick_config()).unwrap();
    assert!(matches!(outcome, TrainOutcome::Trained(_)));

    let students = aggregate_student_features(&class_batch()).unwrap();
    let scored = predict_for_aggregated(students.clone(), &store);
    assert_eq!(scored.len(), students.len());
    for (scored_row, row) in scored.rows.iter().zip(&students.rows) {
        assert!(scored_row.predicted_marks.is_some());
        assert_eq!(scored_row.avg_marks, row.avg_marks);
        assert_eq!(scored_row.subjects, row.subjects);
    }

    // a later batch brings a subject the model never saw
    let later = RawTable::from_rows(vec![
        record("S1", "Music", 65.0, 88.0),
        record("S7", "Music", 30.0, 40.0),
    ]);
    let scored = predict_from_raw(&later, &store).unwrap();
    assert_eq!(scored.len(), 2);
    assert!(scored.rows.iter().all(|r| r.predicted_marks.is_some()));
}

#[test]
fn retraining_identical_data_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let first = ModelStore::new(dir.path().join("a.json"));
    let second = ModelStore::new(dir.path().join("b.json"));
    let students = aggregate_student_features(&class_batch()).unwrap();

    let (TrainOutcome::Trained(a), TrainOutcome::Trained(b)) = (
        train_model(&students, &first, &quick_config()).unwrap(),
        train_model(&students, &second, &quick_config()).unwrap(),
    ) else {
        panic!("both runs should train");
    };
    assert_eq!(a.validation_mse, b.validation_mse);

    let pa = predict_for_aggregated(students.clone(), &first);
    let pb = predict_for_aggregated(students, &second);
    assert_eq!(pa, pb);
}

#[test]
fn single_student_batch_is_not_trained() {
    let dir = tempfile::tempdir().unwrap();
    let store = ModelStore::new(dir.path().join("rf_model.json"));
    let table = RawTable::from_rows(vec![record("S1", "Math", 40.0, 60.0)]);
    let outcome = train_from_raw(&table, &store, &quick_config()).unwrap();
    assert!(matches!(outcome, TrainOutcome::NotTrained { students: 1 }));
}

#[test]
fn csv_input_flows_through() {
    let csv = "enrollment_no,subject,marks,attendance,assignments_completed,assignments_total\n\
               E1,math,40,70,2,4\n\
               E1,physics,,80,3,0\n\
               E2,math,90,,4,4\n";
    let table = RawTable::from_csv_reader(csv.as_bytes()).unwrap();
    let students = aggregate_student_features(&table).unwrap();
    let e1 = students.get("E1").unwrap();
    // missing marks filled with the batch mean of 65
    assert_eq!(e1.avg_marks, 52.5);
    assert_eq!(e1.avg_assign_ratio, 1.75);
    let e2 = students.get("E2").unwrap();
    assert_eq!(e2.avg_attendance, 75.0);
    assert_eq!(e2.subjects["sub_physics"], 0.0);
}

#[test]
fn identifiers_are_not_reformatted() {
    let csv = "enrollment_no,marks\n007,50\n7,60\n0012345,70\n1e3,80\n";
    let table = RawTable::from_csv_reader(csv.as_bytes()).unwrap();
    let students = aggregate_student_features(&table).unwrap();
    assert_eq!(students.len(), 4);
    assert_eq!(students.get("007").unwrap().avg_marks, 50.0);
    assert_eq!(students.get("7").unwrap().avg_marks, 60.0);
    assert_eq!(students.get("0012345").unwrap().avg_marks, 70.0);
    assert_eq!(students.get("1e3").unwrap().avg_marks, 80.0);
}
