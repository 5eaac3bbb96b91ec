//! End-to-end helpers chaining the pipeline stages for callers.

use crate::aggregate::{aggregate, FeatureTable};
use crate::data::RawTable;
use crate::error::Result;
use crate::model::{predict_for_aggregated, train_model, ModelStore, TrainOutcome, TrainingConfig};
use crate::preprocess::{preprocess, PreparedBatch};
use crate::schema::normalize;

/// Output of one pass over a raw batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFeatures {
    pub prepared: PreparedBatch,
    pub students: FeatureTable,
}

/// Normalizes, preprocesses and aggregates a batch. A schema error aborts
/// before anything is aggregated.
pub fn build_features(table: &RawTable) -> Result<BatchFeatures> {
    let normalized = normalize(table)?;
    let prepared = preprocess(&normalized);
    let students = aggregate(&prepared);
    Ok(BatchFeatures { prepared, students })
}

pub fn aggregate_student_features(table: &RawTable) -> Result<FeatureTable> {
    Ok(build_features(table)?.students)
}

pub fn train_from_raw(table: &RawTable, store: &ModelStore, config: &TrainingConfig) -> Result<TrainOutcome> {
    let students = aggregate_student_features(table)?;
    train_model(&students, store, config)
}

pub fn predict_from_raw(table: &RawTable, store: &ModelStore) -> Result<FeatureTable> {
    let students = aggregate_student_features(table)?;
    Ok(predict_for_aggregated(students, store))
}
