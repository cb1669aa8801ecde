use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use vigil_core::config::PostgresConfig;

use crate::error::PersistenceError;
use crate::sink::{AlertQuery, AlertRow, AlertSink, StoredAlert};

const SELECT_ALERTS: &str = "SELECT id, user_id, login_anomaly_score, review_anomaly_score,
        failed_logins, reviews_last_5m, status, is_processed, created_at
     FROM anomaly_alerts";

/// `anomaly_alerts` sink backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgAlertSink {
    pool: PgPool,
}

impl PgAlertSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the profile's Postgres settings.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, PersistenceError> {
        if !config.is_configured() {
            return Err(PersistenceError::NotConfigured(
                "PG_USERNAME not set".into(),
            ));
        }
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}:{}/{}", config.host, config.port, config.database);
        Ok(Self { pool })
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied successfully");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for PgAlertSink {
    async fn insert(&self, rows: &[AlertRow]) -> Result<usize, PersistenceError> {
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let result = sqlx::query(
                "INSERT INTO anomaly_alerts
                    (user_id, login_anomaly_score, review_anomaly_score, failed_logins, reviews_last_5m, status)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(row.user_id)
            .bind(row.login_anomaly_score)
            .bind(row.review_anomaly_score)
            .bind(row.failed_logins)
            .bind(row.reviews_last_5m)
            .bind(&row.status)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                warn!(user_id = row.user_id, error = %e, "alert insert failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(e.into());
            }
        }

        tx.commit().await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl AlertQuery for PgAlertSink {
    async fn bad_alerts(&self) -> Result<Vec<StoredAlert>, PersistenceError> {
        let rows = sqlx::query_as::<_, StoredAlert>(&format!(
            "{SELECT_ALERTS} WHERE status = 'bad' ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn review_anomalies(&self, threshold: f64) -> Result<Vec<StoredAlert>, PersistenceError> {
        let rows = sqlx::query_as::<_, StoredAlert>(&format!(
            "{SELECT_ALERTS} WHERE review_anomaly_score >= $1
             ORDER BY review_anomaly_score DESC, id DESC"
        ))
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn unprocessed_alerts(&self) -> Result<Vec<StoredAlert>, PersistenceError> {
        let rows = sqlx::query_as::<_, StoredAlert>(&format!(
            "{SELECT_ALERTS} WHERE is_processed = FALSE ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<usize, PersistenceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE anomaly_alerts SET is_processed = TRUE
             WHERE id = ANY($1) AND is_processed = FALSE",
        )
        .bind(ids.to_vec())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let changed = result.rows_affected() as usize;
        debug!(requested = ids.len(), changed, "alerts marked processed");
        Ok(changed)
    }
}
