use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("invalid alert row: {0}")]
    InvalidRow(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl From<PersistenceError> for vigil_core::VigilError {
    fn from(e: PersistenceError) -> Self {
        vigil_core::VigilError::Persistence(e.to_string())
    }
}
