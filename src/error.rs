//! Error types for the student performance pipeline.
//!
//! Only hard failures live here. Soft outcomes (too few students to train,
//! no usable model, skipped input rows) are ordinary values returned by the
//! pipeline stages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The batch has no recognizable student identifier column
    #[error("Schema error: {0}")]
    Schema(String),

    /// Model hyper-parameters or training input are unusable
    #[error("Invalid model parameters: {0}")]
    InvalidParams(String),

    #[error("Model error: {0}")]
    Linfa(#[from] linfa::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Excel(#[from] calamine::Error),

    /// Renaming the freshly written artifact over the old one failed
    #[error("Artifact persistence failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Background task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn missing_student_id() -> Self {
        PipelineError::Schema("no identifiable student-id column".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_the_missing_column() {
        let err = PipelineError::missing_student_id();
        assert_eq!(err.to_string(), "Schema error: no identifiable student-id column");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
