use thiserror::Error;

use vigil_core::{SignalType, VigilError};

/// Model failure attributed to the signal whose scorer raised it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{signal} scorer: {source}")]
pub struct ScoringError {
    pub signal: SignalType,
    #[source]
    pub source: VigilError,
}

impl ScoringError {
    pub fn new(signal: SignalType, source: VigilError) -> Self {
        Self { signal, source }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("invalid detection config: {0}")]
    Config(VigilError),
}
