use thiserror::Error;

/// Failure talking to one of the external stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored json is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("feature vector has {got} values, model expects {expected}")]
    FeatureShape { expected: usize, got: usize },

    #[error("feature {index} ({name}) is not a finite number")]
    NonFiniteFeature { index: usize, name: &'static str },

    #[error("no trained ensemble: {0}")]
    ModelUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("insufficient training data: {samples} samples, need {required}")]
    InsufficientTrainingData { samples: usize, required: usize },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
