//! Error types for the data-access layer.
//!
//! Every failure surfaces as a [`DbError`] whose variant tells the caller what
//! kind of problem occurred: the target could not be reached, a table could not
//! be resolved, a request was malformed, or the database rejected a statement.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Invalid query: {message}")]
    Query { message: String },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (scope: {scope_id})")]
    Transaction { message: String, scope_id: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error for the given table or column.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a query error (malformed request or unsupported operation).
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            scope_id: scope_id.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Statement { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Statement { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if a caller may reasonably retry the whole operation.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::statement(
                    db_err.message(),
                    code,
                    "Check constraints, column types and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::statement(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Increase pool_size/max_overflow or release scopes sooner",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Acquire the target again")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => DbError::statement(
                format!("Failed to decode column {}: {}", index, source),
                None,
                "Check that the column type is supported",
            ),
            sqlx::Error::Decode(source) => DbError::statement(
                format!("Decode error: {}", source),
                None,
                "Check that the column type is supported",
            ),
            sqlx::Error::Encode(source) => DbError::statement(
                format!("Encode error: {}", source),
                None,
                "Check the value types bound to the statement",
            ),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Acquire the target again",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
