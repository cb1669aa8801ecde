//! Per-signal anomaly scorer.
//!
//! Owns one isolation forest trained on a signal's baseline and turns
//! forest output into stored scores and statuses. Two modes:
//!
//! - **score**: continuous score `forest score - boundary` (higher = more
//!   anomalous, 0 = on the contamination boundary), rounded and classified
//!   against a fixed threshold.
//! - **label**: binary verdict at the contamination boundary.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_core::config::DetectionConfig;
use vigil_core::{AnomalyScore, Label, Observation, SignalType, Status};

use crate::algorithms::isolation_forest::{Contamination, ForestParams, IsolationForest};
use crate::error::ScoringError;
use crate::pipeline::features::{extract, extract_batch, FeatureVector};

/// Scoring constants for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Scores at or above this value are `Bad`.
    pub threshold: f64,
    pub contamination: f64,
    pub tree_count: usize,
    pub subsample_size: usize,
    pub seed: u64,
    pub decimals: u32,
}

impl ScoringPolicy {
    pub fn for_signal(signal: SignalType, config: &DetectionConfig) -> Self {
        Self {
            threshold: config.threshold,
            contamination: config.contamination(signal),
            tree_count: config.tree_count,
            subsample_size: config.subsample_size,
            seed: config.seed(signal),
            decimals: config.decimals,
        }
    }

    fn forest_params(&self) -> ForestParams {
        ForestParams {
            tree_count: self.tree_count,
            subsample_size: self.subsample_size,
            seed: self.seed,
            contamination: Contamination::Rate(self.contamination),
        }
    }

    pub fn classify(&self, score: f64) -> Status {
        if score >= self.threshold {
            Status::Bad
        } else {
            Status::Good
        }
    }

    pub fn round(&self, score: f64) -> f64 {
        let factor = 10_f64.powi(self.decimals as i32);
        (score * factor).round() / factor
    }
}

/// Trains and applies the model for a single signal.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    signal: SignalType,
    policy: ScoringPolicy,
    forest: Option<IsolationForest>,
}

impl AnomalyScorer {
    pub fn new(signal: SignalType, policy: ScoringPolicy) -> Self {
        Self {
            signal,
            policy,
            forest: None,
        }
    }

    pub fn from_config(signal: SignalType, config: &DetectionConfig) -> Self {
        Self::new(signal, ScoringPolicy::for_signal(signal, config))
    }

    pub fn signal(&self) -> SignalType {
        self.signal
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn is_trained(&self) -> bool {
        self.forest.is_some()
    }

    /// Fit a fresh model on the baseline. On failure the scorer is left
    /// untrained, even if it held a model before.
    pub fn train_baseline(&mut self, baseline: &[Observation]) -> Result<(), ScoringError> {
        self.forest = None;

        let features = extract_batch(baseline);
        let mut forest = IsolationForest::new(self.policy.forest_params());
        forest
            .fit(&features)
            .map_err(|e| ScoringError::new(self.signal, e))?;

        debug!(
            signal = %self.signal,
            baseline = baseline.len(),
            boundary = forest.boundary().unwrap_or_default(),
            "baseline trained"
        );
        self.forest = Some(forest);
        Ok(())
    }

    /// Continuous score; higher = more anomalous, 0 on the boundary.
    pub fn predict_score(&self, vector: &FeatureVector) -> Result<f64, ScoringError> {
        self.forest()?
            .decision(vector.as_slice())
            .map_err(|e| ScoringError::new(self.signal, e))
    }

    pub fn predict_label(&self, vector: &FeatureVector) -> Result<Label, ScoringError> {
        let anomalous = self
            .forest()?
            .is_anomalous(vector.as_slice())
            .map_err(|e| ScoringError::new(self.signal, e))?;
        Ok(if anomalous {
            Label::Anomalous
        } else {
            Label::Normal
        })
    }

    /// Score every observation of this scorer's signal.
    pub fn score_batch(&self, recent: &[Observation]) -> Result<Vec<AnomalyScore>, ScoringError> {
        self.forest()?;
        let mut scores = Vec::with_capacity(recent.len());
        for obs in self.matching(recent) {
            let score = self.policy.round(self.predict_score(&extract(obs))?);
            scores.push(AnomalyScore {
                user_id: obs.user_id,
                signal_type: self.signal,
                score,
                status: self.policy.classify(score),
                raw_value: obs.raw_value,
            });
        }
        Ok(scores)
    }

    /// Binary verdict for every observation of this scorer's signal.
    pub fn label_batch(
        &self,
        recent: &[Observation],
    ) -> Result<Vec<(Observation, Label)>, ScoringError> {
        self.forest()?;
        self.matching(recent)
            .map(|obs| Ok((*obs, self.predict_label(&extract(obs))?)))
            .collect()
    }

    fn matching<'a>(&self, recent: &'a [Observation]) -> impl Iterator<Item = &'a Observation> {
        let signal = self.signal;
        recent.iter().filter(move |obs| {
            let keep = obs.signal_type == signal;
            if !keep {
                warn!(
                    expected = %signal,
                    actual = %obs.signal_type,
                    user_id = obs.user_id,
                    "skipping observation for another signal"
                );
            }
            keep
        })
    }

    fn forest(&self) -> Result<&IsolationForest, ScoringError> {
        self.forest.as_ref().ok_or_else(|| {
            ScoringError::new(
                self.signal,
                vigil_core::VigilError::NotFitted(format!(
                    "{} scorer has no baseline model",
                    self.signal
                )),
            )
        })
    }
}
