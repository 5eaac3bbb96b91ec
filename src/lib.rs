//! Student performance tracking: CSV/JSON ingestion, per-student feature
//! aggregation, random-forest marks prediction and at-risk alerts.
//!
//! Data flows `data` → `schema` → `preprocess` → `aggregate` →
//! `model` (train offline, predict online) → `alerts`.

pub mod aggregate;
pub mod alerts;
pub mod analytics;
pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod forest;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod schema;

pub use aggregate::{FeatureTable, FeatureVector};
pub use alerts::{Alert, Recommendation};
pub use data::{Cell, RawTable};
pub use error::{PipelineError, Result};
pub use model::{ModelArtifact, ModelStore, TrainOutcome, TrainingConfig};
