//! Model training, persistence and prediction.
//!
//! The fitted forest is stored together with the ordered feature columns it
//! was trained on. Predictions are aligned to that list by name, so batches
//! with a different subject mix can still be scored.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use linfa::prelude::{DatasetBase, Fit, Predict, SingleTargetRegression};
use ndarray::{Array1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::aggregate::{FeatureTable, AVG_MARKS};
use crate::error::PipelineError;
use crate::forest::{ForestParams, RandomForestRegressor};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
pub const MIN_TRAINING_STUDENTS: usize = 2;
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub target: String,
    pub trained_at: DateTime<Utc>,
    pub validation_mse: f64,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub forest: RandomForestRegressor,
}

impl ModelArtifact {
    /// Whether the artifact carries enough schema to score rows.
    pub fn is_usable(&self) -> bool {
        !self.feature_names.is_empty() && self.feature_names.len() == self.forest.n_features()
    }
}

/// Handle to the persisted model. Writers replace the file atomically;
/// readers that cannot load it get `None`.
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Writes to a temporary sibling file, syncs it and renames it over the
    /// target, so a reader sees either the old artifact or the new one.
    pub fn save(&self, artifact: &ModelArtifact) -> Result<(), PipelineError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, artifact)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), "Model artifact written");
        Ok(())
    }

    pub fn load(&self) -> Option<ModelArtifact> {
        if !self.exists() {
            debug!(path = %self.path.display(), "No model artifact");
            return None;
        }
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Model artifact unreadable");
                return None;
            }
        };
        match serde_json::from_reader::<_, ModelArtifact>(BufReader::new(file)) {
            Ok(artifact) if artifact.format_version == ARTIFACT_FORMAT_VERSION => Some(artifact),
            Ok(artifact) => {
                warn!(
                    found = artifact.format_version,
                    expected = ARTIFACT_FORMAT_VERSION,
                    "Model artifact has an unsupported format version"
                );
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Model artifact is corrupt");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub forest: ForestParams,
    pub validation_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub validation_mse: f64,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainOutcome {
    Trained(TrainingReport),
    /// Too few students to hold out a validation split.
    NotTrained { students: usize },
}

/// Shuffles row indices with a fixed seed and splits off the holdout rows.
/// The holdout gets `ceil(fraction * n)` rows, and both sides keep at least one.
pub fn holdout_split(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((n as f64 * fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let train = indices.split_off(n_test);
    (train, indices)
}

/// Fits a forest predicting `avg_marks` from every other feature column and
/// persists it through `store`.
pub fn train_model(
    table: &FeatureTable,
    store: &ModelStore,
    config: &TrainingConfig,
) -> Result<TrainOutcome, PipelineError> {
    if table.len() < MIN_TRAINING_STUDENTS {
        info!(students = table.len(), "Not enough students to train a model");
        return Ok(TrainOutcome::NotTrained {
            students: table.len(),
        });
    }

    let feature_names = table.feature_columns();
    let x = table.matrix(&feature_names);
    let y = Array1::from_vec(table.targets());

    let (train_idx, test_idx) = holdout_split(table.len(), config.validation_fraction, config.forest.seed);
    let train = DatasetBase::new(x.select(Axis(0), &train_idx), y.select(Axis(0), &train_idx));
    let x_test = x.select(Axis(0), &test_idx);
    let y_test = y.select(Axis(0), &test_idx);

    let forest = config.forest.fit(&train)?;
    let predictions: Array1<f64> = forest.predict(&x_test);
    let validation_mse = predictions.mean_squared_error(&y_test)?;

    let artifact = ModelArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        feature_names: feature_names.clone(),
        target: AVG_MARKS.to_string(),
        trained_at: Utc::now(),
        validation_mse,
        train_rows: train_idx.len(),
        validation_rows: test_idx.len(),
        forest,
    };
    store.save(&artifact)?;

    info!(
        students = table.len(),
        features = feature_names.len(),
        validation_mse,
        path = %store.path().display(),
        "Model trained"
    );

    Ok(TrainOutcome::Trained(TrainingReport {
        validation_mse,
        train_rows: artifact.train_rows,
        validation_rows: artifact.validation_rows,
        feature_names,
        trained_at: artifact.trained_at,
    }))
}

/// Scores every row with the stored model. Without a usable model every
/// `predicted_marks` is null.
pub fn predict_for_aggregated(mut table: FeatureTable, store: &ModelStore) -> FeatureTable {
    let artifact = store.load().filter(|a| {
        let usable = a.is_usable();
        if !usable {
            warn!("Model artifact lacks a matching feature schema");
        }
        usable
    });

    let Some(artifact) = artifact else {
        for row in &mut table.rows {
            row.predicted_marks = None;
        }
        return table;
    };

    if table.is_empty() {
        return table;
    }

    let ignored = table
        .subject_columns
        .iter()
        .filter(|c| !artifact.feature_names.contains(c))
        .count();
    if ignored > 0 {
        debug!(ignored, "Dropping feature columns the model was not trained on");
    }

    let x = table.matrix(&artifact.feature_names);
    let predictions: Array1<f64> = artifact.forest.predict(&x);
    for (row, predicted) in table.rows.iter_mut().zip(predictions.iter()) {
        row.predicted_marks = Some(*predicted);
    }
    table
}
