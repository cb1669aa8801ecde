//! Alert persistence capability.
//!
//! Detection hands fused alerts to an injected [`AlertSink`]; it never
//! opens connections itself. Writes are append-only.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vigil_core::{AlertRecord, Status, UserId};

use crate::error::PersistenceError;

/// One `anomaly_alerts` row as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub user_id: i64,
    pub login_anomaly_score: Option<f64>,
    pub review_anomaly_score: Option<f64>,
    pub failed_logins: Option<i64>,
    pub reviews_last_5m: Option<i64>,
    pub status: Option<String>,
}

impl TryFrom<&AlertRecord> for AlertRow {
    type Error = PersistenceError;

    fn try_from(alert: &AlertRecord) -> Result<Self, Self::Error> {
        let user_id = i64::try_from(alert.user_id).map_err(|_| {
            PersistenceError::InvalidRow(format!("user_id {} exceeds BIGINT", alert.user_id))
        })?;
        Ok(Self {
            user_id,
            login_anomaly_score: alert.login_anomaly_score,
            review_anomaly_score: alert.review_anomaly_score,
            failed_logins: alert.failed_logins,
            reviews_last_5m: alert.reviews_last_5m,
            status: alert.status().map(|s| s.as_str().to_string()),
        })
    }
}

/// A persisted alert as read back.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredAlert {
    pub id: i64,
    pub user_id: i64,
    pub login_anomaly_score: Option<f64>,
    pub review_anomaly_score: Option<f64>,
    pub failed_logins: Option<i64>,
    pub reviews_last_5m: Option<i64>,
    pub status: Option<String>,
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredAlert {
    pub fn user(&self) -> UserId {
        self.user_id.max(0) as UserId
    }

    pub fn parsed_status(&self) -> Option<Status> {
        self.status.as_deref().and_then(Status::parse)
    }
}

/// Destination for fused alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Append all rows atomically; returns rows written.
    async fn insert(&self, rows: &[AlertRow]) -> Result<usize, PersistenceError>;
}

/// Read side over persisted alerts, plus the processed flag downstream
/// handlers set once they have acted on an alert.
#[async_trait]
pub trait AlertQuery: Send + Sync {
    /// Alerts with status `bad`, newest first.
    async fn bad_alerts(&self) -> Result<Vec<StoredAlert>, PersistenceError>;

    /// Alerts whose review score is at least `threshold`, highest first.
    async fn review_anomalies(&self, threshold: f64) -> Result<Vec<StoredAlert>, PersistenceError>;

    /// Alerts not yet handled, oldest first.
    async fn unprocessed_alerts(&self) -> Result<Vec<StoredAlert>, PersistenceError>;

    /// Flag `ids` as processed in one write. Returns how many rows changed;
    /// unknown or already processed ids are skipped.
    async fn mark_processed(&self, ids: &[i64]) -> Result<usize, PersistenceError>;
}

/// Append `alerts` to the sink. Empty input writes nothing and does not
/// touch the sink.
pub async fn persist(sink: &dyn AlertSink, alerts: &[AlertRecord]) -> Result<usize, PersistenceError> {
    if alerts.is_empty() {
        debug!("no alerts to persist");
        return Ok(0);
    }
    let rows = alerts
        .iter()
        .map(AlertRow::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let written = sink.insert(&rows).await?;
    info!(rows = written, "alerts persisted");
    Ok(written)
}

// ── In-memory sink ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<StoredAlert>,
    next_id: i64,
    reject: Option<String>,
    insert_calls: usize,
}

/// Sink holding alerts in memory. Used for dry runs and tests; can be armed
/// to reject writes.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert fail with `reason`.
    pub fn reject_writes(&self, reason: impl Into<String>) {
        self.lock().reject = Some(reason.into());
    }

    pub fn accept_writes(&self) {
        self.lock().reject = None;
    }

    pub fn rows(&self) -> Vec<StoredAlert> {
        self.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times `insert` was invoked, successful or not.
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a panicking test thread; the rows are intact.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn insert(&self, rows: &[AlertRow]) -> Result<usize, PersistenceError> {
        let mut state = self.lock();
        state.insert_calls += 1;
        if let Some(reason) = &state.reject {
            return Err(PersistenceError::Rejected(reason.clone()));
        }
        let now = Utc::now();
        for row in rows {
            state.next_id += 1;
            let id = state.next_id;
            state.rows.push(StoredAlert {
                id,
                user_id: row.user_id,
                login_anomaly_score: row.login_anomaly_score,
                review_anomaly_score: row.review_anomaly_score,
                failed_logins: row.failed_logins,
                reviews_last_5m: row.reviews_last_5m,
                status: row.status.clone(),
                is_processed: false,
                created_at: now,
            });
        }
        Ok(rows.len())
    }
}

#[async_trait]
impl AlertQuery for MemorySink {
    async fn bad_alerts(&self) -> Result<Vec<StoredAlert>, PersistenceError> {
        let mut rows: Vec<StoredAlert> = self
            .lock()
            .rows
            .iter()
            .filter(|r| r.parsed_status() == Some(Status::Bad))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn review_anomalies(&self, threshold: f64) -> Result<Vec<StoredAlert>, PersistenceError> {
        let mut rows: Vec<StoredAlert> = self
            .lock()
            .rows
            .iter()
            .filter(|r| r.review_anomaly_score.is_some_and(|s| s >= threshold))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.review_anomaly_score
                .partial_cmp(&a.review_anomaly_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.id.cmp(&a.id))
        });
        Ok(rows)
    }

    async fn unprocessed_alerts(&self) -> Result<Vec<StoredAlert>, PersistenceError> {
        let mut rows: Vec<StoredAlert> = self
            .lock()
            .rows
            .iter()
            .filter(|r| !r.is_processed)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(rows)
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<usize, PersistenceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        if let Some(reason) = &state.reject {
            return Err(PersistenceError::Rejected(reason.clone()));
        }
        let mut changed = 0;
        for row in state.rows.iter_mut().filter(|r| !r.is_processed && ids.contains(&r.id)) {
            row.is_processed = true;
            changed += 1;
        }
        debug!(requested = ids.len(), changed, "alerts marked processed");
        Ok(changed)
    }
}
