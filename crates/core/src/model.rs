use serde::{Deserialize, Serialize};

/// Application user identifier. Missing ids in source records map to 0.
pub type UserId = u64;

/// Behavioral signal a score was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Failed login attempts in the export window.
    FailedLogin,
    /// Reviews written in the last five minutes.
    ReviewRate,
}

impl SignalType {
    pub const ALL: [SignalType; 2] = [SignalType::FailedLogin, SignalType::ReviewRate];

    /// Field holding the raw count in exported activity records.
    pub fn record_field(&self) -> &'static str {
        match self {
            SignalType::FailedLogin => "failed_logins",
            SignalType::ReviewRate => "reviews_last_5m",
        }
    }

    /// `anomaly_alerts` column receiving this signal's score.
    pub fn score_column(&self) -> &'static str {
        match self {
            SignalType::FailedLogin => "login_anomaly_score",
            SignalType::ReviewRate => "review_anomaly_score",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignalType::FailedLogin => "failed_login",
            SignalType::ReviewRate => "review_rate",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One user's activity count for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub user_id: UserId,
    pub signal_type: SignalType,
    pub raw_value: f64,
}

impl Observation {
    /// Build an observation; negative or non-finite counts become 0.
    pub fn new(user_id: UserId, signal_type: SignalType, raw_value: f64) -> Self {
        let raw_value = if raw_value.is_finite() && raw_value > 0.0 {
            raw_value
        } else {
            0.0
        };
        Self {
            user_id,
            signal_type,
            raw_value,
        }
    }
}

/// Threshold classification persisted in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Good,
    Bad,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Good => "good",
            Status::Bad => "bad",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Some(Status::Good),
            "bad" => Some(Status::Bad),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary outcome of the contamination-calibrated decision boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Normal,
    Anomalous,
}

/// Continuous score for one observation. Higher = more anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub user_id: UserId,
    pub signal_type: SignalType,
    pub score: f64,
    pub status: Status,
    /// Count the score was computed from.
    pub raw_value: f64,
}

/// Fused per-user alert, one row of `anomaly_alerts`.
///
/// Fields for signals the user was absent from stay `None`; a zero would
/// read as a benign score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub user_id: UserId,
    pub login_anomaly_score: Option<f64>,
    pub review_anomaly_score: Option<f64>,
    pub login_status: Option<Status>,
    pub review_status: Option<Status>,
    pub failed_logins: Option<i64>,
    pub reviews_last_5m: Option<i64>,
}

impl AlertRecord {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn score(&self, signal: SignalType) -> Option<f64> {
        match signal {
            SignalType::FailedLogin => self.login_anomaly_score,
            SignalType::ReviewRate => self.review_anomaly_score,
        }
    }

    pub fn signal_status(&self, signal: SignalType) -> Option<Status> {
        match signal {
            SignalType::FailedLogin => self.login_status,
            SignalType::ReviewRate => self.review_status,
        }
    }

    pub fn count(&self, signal: SignalType) -> Option<i64> {
        match signal {
            SignalType::FailedLogin => self.failed_logins,
            SignalType::ReviewRate => self.reviews_last_5m,
        }
    }

    /// Record a signal's score, status and raw count on this alert.
    pub fn set_score(&mut self, score: &AnomalyScore) {
        let count = Some(score.raw_value.round() as i64);
        match score.signal_type {
            SignalType::FailedLogin => {
                self.login_anomaly_score = Some(score.score);
                self.login_status = Some(score.status);
                self.failed_logins = count;
            }
            SignalType::ReviewRate => {
                self.review_anomaly_score = Some(score.score);
                self.review_status = Some(score.status);
                self.reviews_last_5m = count;
            }
        }
    }

    /// Record only the raw count (binary-label alerts carry no score).
    pub fn set_count(&mut self, signal: SignalType, raw_value: f64) {
        let count = Some(raw_value.round() as i64);
        match signal {
            SignalType::FailedLogin => self.failed_logins = count,
            SignalType::ReviewRate => self.reviews_last_5m = count,
        }
    }

    /// Combined status: bad if any signal is bad, `None` when no signal
    /// carried a status.
    pub fn status(&self) -> Option<Status> {
        let statuses = [self.login_status, self.review_status];
        if statuses.contains(&Some(Status::Bad)) {
            Some(Status::Bad)
        } else if statuses.iter().any(Option::is_some) {
            Some(Status::Good)
        } else {
            None
        }
    }

    /// Number of signals with a score on this record.
    pub fn scored_signals(&self) -> usize {
        SignalType::ALL
            .iter()
            .filter(|s| self.score(**s).is_some())
            .count()
    }
}
