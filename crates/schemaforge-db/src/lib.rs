//! Execution of compiled domain statements against PostgreSQL.

pub mod error;
pub mod executor;
pub mod provision;
pub mod redact;

pub use error::{DbError, DbResult};
pub use executor::{Executor, PostgresExecutor};
pub use redact::{RedactedConnection, redact_connection_string};
