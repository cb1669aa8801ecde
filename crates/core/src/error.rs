use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VigilError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("model not fitted: {0}")]
    NotFitted(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type VigilResult<T> = Result<T, VigilError>;
