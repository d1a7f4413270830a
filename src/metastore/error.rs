use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// `sqlx` reports unique-constraint violations as a generic database error;
/// inspect the driver message to tell a conflict apart from any other I/O
/// failure, since SQLite doesn't give us a typed error variant for it.
pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.message().contains("UNIQUE constraint failed")
                || db_err.code().as_deref() == Some("2067")
        }
        _ => false,
    }
}
