//! Error types for the broker.
//!
//! All fallible operations return [`DbResult`]. Variants correspond to the
//! behavioral error kinds of the system: configuration, connection,
//! admission, execution, timeout, shutdown, and not-found. Caller-facing
//! messages are produced by the `Display` impls, so the exact wording lives
//! here and nowhere else.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Missing or contradictory configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Adapter connect/disconnect/ping failure.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Validator rejection. No database round-trip has occurred.
    #[error("Query validation failed: {0}")]
    Validation(String),

    /// Driver-reported execution failure, original message preserved.
    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g. "42P01" for an undefined table
        sql_state: Option<String>,
    },

    /// The executor's timer won the race against the adapter call.
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// A call arrived after `disconnect` started.
    #[error("adapter is shutting down")]
    ShuttingDown,

    /// A call arrived before `connect` completed.
    #[error("adapter is not connected")]
    NotConnected,

    /// Unknown pool name.
    #[error("Database connection '{name}' not found. Available: {available}")]
    ConnectionNotFound { name: String, available: String },

    /// No pool named and no default configured.
    #[error("No connection name specified and no default connection configured")]
    NoDefaultConnection,

    /// Database type outside the registered set.
    #[error("Unsupported database type: {0}")]
    UnsupportedType(String),

    /// Type is registered but its driver probe failed.
    #[error("Database driver for {0} is not available")]
    DriverUnavailable(String),

    /// Natural-language generation could not produce SQL for the question.
    #[error("Could not generate SQL: {0}")]
    Generation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn validation(errors: &[String]) -> Self {
        Self::Validation(errors.join("; "))
    }

    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when retrying the same call could plausibly succeed.
    /// Surfaced for diagnostics only; the query path never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::QueryTimeout { .. })
    }
}

/// Map sqlx errors onto the behavioral kinds, preserving driver messages.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => DbError::connection("connection pool acquire timed out"),
            sqlx::Error::PoolClosed => DbError::connection("connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::connection(format!("I/O error: {io_err}")),
            sqlx::Error::Tls(tls_err) => DbError::connection(format!("TLS error: {tls_err}")),
            sqlx::Error::Protocol(msg) => DbError::connection(format!("protocol error: {msg}")),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::query(format!("Column not found: {col}"), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("failed to decode column {index}: {source}"))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("decode error: {source}")),
            sqlx::Error::WorkerCrashed => DbError::internal("database worker crashed"),
            other => DbError::internal(format!("database error: {other}")),
        }
    }
}

/// Result type alias for broker operations.
pub type DbResult<T> = Result<T, DbError>;
