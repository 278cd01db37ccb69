use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("student not found: {0}")]
    NotFound(Uuid),

    #[error("conflicting record: {0}")]
    Conflict(String),

    #[error("{0} does not fit the database column")]
    OutOfRange(&'static str),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("student not found: {0}")]
    NotFound(Uuid),

    #[error("no editable fields provided")]
    NoEditableFields,

    #[error("invalid academic update: {0}")]
    InvalidAcademics(&'static str),

    #[error("invalid risk model: {0}")]
    InvalidRiskModel(String),

    #[error("failed to write export: {0}")]
    Export(#[from] csv::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
