//! Batch detection pipeline.
//!
//! One run trains a fresh model per signal on its baseline, scores the
//! signal's recent observations and fuses the per-signal results into one
//! alert per user. Signals share no state and run on the rayon pool.

pub mod features;
pub mod fusion;
pub mod metrics;
pub mod scorer;

use std::str::FromStr;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_core::config::DetectionConfig;
use vigil_core::{AlertRecord, AnomalyScore, Label, Observation, SignalType, VigilError};

use crate::error::{PipelineError, ScoringError};

use self::fusion::{fuse, fuse_labels};
use self::metrics::{RunReport, SignalReport};
use self::scorer::AnomalyScorer;

/// How recent observations are judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Continuous score with threshold status on every scored user.
    #[default]
    Score,
    /// Binary verdict; only anomalous users become alerts.
    Label,
}

impl FromStr for DetectionMode {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" => Ok(DetectionMode::Score),
            "label" => Ok(DetectionMode::Label),
            other => Err(VigilError::InvalidConfig(format!(
                "unknown detection mode '{other}' (expected score or label)"
            ))),
        }
    }
}

/// What a run does when one signal's model fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalFailurePolicy {
    /// Fail the whole run; nothing is fused.
    #[default]
    Abort,
    /// Log the failure and fuse the remaining signals as if it were absent.
    Omit,
}

/// Baseline and recent observations for one signal.
#[derive(Debug, Clone)]
pub struct SignalBatch {
    pub signal: SignalType,
    pub baseline: Vec<Observation>,
    pub recent: Vec<Observation>,
}

impl SignalBatch {
    pub fn new(signal: SignalType, baseline: Vec<Observation>, recent: Vec<Observation>) -> Self {
        Self {
            signal,
            baseline,
            recent,
        }
    }
}

/// Fused alerts plus the per-signal scores they came from.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub alerts: Vec<AlertRecord>,
    /// Score-mode output per signal; empty in label mode.
    pub scores: Vec<AnomalyScore>,
    pub report: RunReport,
}

impl PipelineOutput {
    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }
}

enum SignalOutcome {
    Scores(Vec<AnomalyScore>),
    Labels(Vec<(Observation, Label)>),
}

pub struct Pipeline {
    detection: DetectionConfig,
    mode: DetectionMode,
    on_failure: SignalFailurePolicy,
}

impl Pipeline {
    /// Build a pipeline, rejecting out-of-range detection settings.
    pub fn new(detection: DetectionConfig) -> Result<Self, PipelineError> {
        detection.validate().map_err(PipelineError::Config)?;
        Ok(Self {
            detection,
            mode: DetectionMode::default(),
            on_failure: SignalFailurePolicy::default(),
        })
    }

    pub fn with_mode(mut self, mode: DetectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_failure_policy(mut self, policy: SignalFailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Run every signal batch and fuse the results.
    ///
    /// A signal with no recent observations is skipped without training.
    /// Failures abort the run unless the failure policy is `Omit`.
    pub fn run(&self, batches: &[SignalBatch]) -> Result<PipelineOutput, PipelineError> {
        let timer = RunReport::begin();
        info!(
            run_id = %timer.run_id(),
            mode = ?self.mode,
            signals = batches.len(),
            "detection run started"
        );

        let results: Vec<(SignalReport, Result<Option<SignalOutcome>, ScoringError>)> =
            batches.par_iter().map(|b| self.run_signal(b)).collect();

        let mut reports = Vec::with_capacity(results.len());
        let mut scores: Vec<AnomalyScore> = Vec::new();
        let mut labels: Vec<Vec<(Observation, Label)>> = Vec::new();
        let mut score_sets: Vec<Vec<AnomalyScore>> = Vec::new();

        for (mut report, result) in results {
            match result {
                Ok(Some(SignalOutcome::Scores(s))) => {
                    report.record_scores(&s);
                    score_sets.push(s);
                }
                Ok(Some(SignalOutcome::Labels(l))) => {
                    report.record_labels(&l);
                    labels.push(l);
                }
                Ok(None) => {}
                Err(e) => match self.on_failure {
                    SignalFailurePolicy::Abort => return Err(e.into()),
                    SignalFailurePolicy::Omit => {
                        warn!(signal = %e.signal, error = %e.source, "signal omitted from fusion");
                        report.error = Some(e.to_string());
                    }
                },
            }
            reports.push(report);
        }

        let alerts = match self.mode {
            DetectionMode::Score => {
                let refs: Vec<&[AnomalyScore]> = score_sets.iter().map(Vec::as_slice).collect();
                fuse(&refs)
            }
            DetectionMode::Label => {
                let refs: Vec<&[(Observation, Label)]> =
                    labels.iter().map(Vec::as_slice).collect();
                fuse_labels(&refs)
            }
        };
        for set in score_sets {
            scores.extend(set);
        }

        let report = timer.finish(reports, &alerts);
        info!(
            run_id = %report.run_id,
            alerts = report.alerts,
            bad = report.bad_alerts,
            duration_ms = report.duration_ms,
            "detection run finished"
        );

        Ok(PipelineOutput {
            alerts,
            scores,
            report,
        })
    }

    fn run_signal(
        &self,
        batch: &SignalBatch,
    ) -> (SignalReport, Result<Option<SignalOutcome>, ScoringError>) {
        let start = Instant::now();
        let mut report = SignalReport::new(batch.signal, batch.baseline.len());

        if batch.recent.is_empty() {
            debug!(signal = %batch.signal, "no recent observations, skipping");
            return (report, Ok(None));
        }

        let mut scorer = AnomalyScorer::from_config(batch.signal, &self.detection);
        let result = scorer.train_baseline(&batch.baseline).and_then(|()| {
            match self.mode {
                DetectionMode::Score => scorer.score_batch(&batch.recent).map(SignalOutcome::Scores),
                DetectionMode::Label => scorer.label_batch(&batch.recent).map(SignalOutcome::Labels),
            }
        });

        report.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            signal = %batch.signal,
            baseline = batch.baseline.len(),
            recent = batch.recent.len(),
            ok = result.is_ok(),
            "signal processed"
        );
        (report, result.map(Some))
    }
}
