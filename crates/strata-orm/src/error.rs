//! Error types for the execution layer.

use thiserror::Error;

/// Errors raised while executing a built query.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No row found when exactly one was expected.
    #[error("object not found")]
    NotFound,

    /// Multiple rows found when exactly one was expected.
    #[error("multiple objects returned when one was expected")]
    MultipleObjectsReturned,

    /// The query could not be rendered.
    #[error("query error: {0}")]
    Builder(#[from] strata_sql_core::BuilderError),

    /// The model metadata is unusable for this operation.
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, OrmError>;
