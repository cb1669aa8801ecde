use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use vigil_core::{AlertRecord, AnomalyScore, Label, SignalType, Status};

/// Outcome of one signal within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalReport {
    pub signal: SignalType,
    pub baseline_size: usize,
    /// Recent observations scored or labelled.
    pub scored: usize,
    /// `Bad` scores (score mode) or `Anomalous` labels (label mode).
    pub flagged: usize,
    /// Set when the signal failed and was omitted from fusion.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SignalReport {
    pub(crate) fn new(signal: SignalType, baseline_size: usize) -> Self {
        Self {
            signal,
            baseline_size,
            scored: 0,
            flagged: 0,
            error: None,
            duration_ms: 0,
        }
    }

    pub(crate) fn record_scores(&mut self, scores: &[AnomalyScore]) {
        self.scored = scores.len();
        self.flagged = scores.iter().filter(|s| s.status == Status::Bad).count();
    }

    pub(crate) fn record_labels<T>(&mut self, labels: &[(T, Label)]) {
        self.scored = labels.len();
        self.flagged = labels
            .iter()
            .filter(|(_, l)| *l == Label::Anomalous)
            .count();
    }
}

/// Summary of one pipeline run, logged by the driver and printed on dry runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub signals: Vec<SignalReport>,
    pub alerts: usize,
    pub bad_alerts: usize,
}

impl RunReport {
    pub fn begin() -> RunTimer {
        RunTimer {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn failed_signals(&self) -> impl Iterator<Item = &SignalReport> {
        self.signals.iter().filter(|s| s.error.is_some())
    }
}

/// Scoped timer that produces the run report when finished.
pub struct RunTimer {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl RunTimer {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn finish(self, signals: Vec<SignalReport>, alerts: &[AlertRecord]) -> RunReport {
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            duration_ms: self.start.elapsed().as_millis() as u64,
            signals,
            alerts: alerts.len(),
            bad_alerts: alerts
                .iter()
                .filter(|a| a.status() == Some(Status::Bad))
                .count(),
        }
    }
}
