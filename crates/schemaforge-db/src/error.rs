use thiserror::Error;

/// Errors raised while provisioning a domain in the database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Core(#[from] schemaforge_core::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;
