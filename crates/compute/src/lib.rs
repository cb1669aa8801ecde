pub mod algorithms;
pub mod error;
pub mod pipeline;

pub use algorithms::isolation_forest::{Contamination, ForestParams, IsolationForest};
pub use error::{PipelineError, ScoringError};
pub use pipeline::features::{extract, observations_from_records, FeatureVector, RecordBatch};
pub use pipeline::fusion::{fuse, fuse_labels};
pub use pipeline::metrics::{RunReport, SignalReport};
pub use pipeline::scorer::{AnomalyScorer, ScoringPolicy};
pub use pipeline::{DetectionMode, Pipeline, PipelineOutput, SignalBatch, SignalFailurePolicy};
