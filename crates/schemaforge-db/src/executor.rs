use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::error::DbResult;
use crate::redact::redact_connection_string;

/// Runs ordered batches of SQL statements.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Whether every statement is committed on its own.
    fn autocommit(&self) -> bool;

    /// Executes the statements in order. Without autocommit the whole batch
    /// is committed at the end, or not at all.
    async fn execute_batch(&self, statements: &[String]) -> DbResult<()>;
}

/// Executor backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
    autocommit: bool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool, autocommit: bool) -> Self {
        Self { pool, autocommit }
    }

    /// Opens a pool for the given connection string.
    pub async fn connect(conn: &str, autocommit: bool) -> DbResult<Self> {
        let redacted = redact_connection_string(conn);
        info!(
            event = "db_connect",
            conn = %redacted.redacted,
            autocommit,
            "connecting to postgres"
        );
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(conn)
            .await?;
        Ok(Self::new(pool, autocommit))
    }

    /// The same pool with a different commit mode.
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn execute_batch(&self, statements: &[String]) -> DbResult<()> {
        // DDL is never parameterised, so it goes through the simple query protocol.
        if self.autocommit {
            for statement in statements {
                info!(event = "db_execute", statement = %statement);
                sqlx::raw_sql(statement).execute(&self.pool).await?;
            }
            return Ok(());
        }

        let mut transaction = self.pool.begin().await?;
        for statement in statements {
            info!(event = "db_execute", statement = %statement);
            sqlx::Executor::execute(&mut *transaction, sqlx::raw_sql(statement)).await?;
        }
        transaction.commit().await?;
        debug!(event = "db_commit", statements = statements.len());
        Ok(())
    }
}
