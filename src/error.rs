//! Error types for the SQL gateway.
//!
//! This module defines the error taxonomy using `thiserror`. Every variant carries
//! a stable reason code (see [`GatewayError::kind`]) so that callers, including
//! the reasoning loop, receive structured responses they can act on.

use crate::tools::sql_validator::RejectionReason;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// Underlying database error while executing a statement.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error(
        "Timeout: {operation}{}",
        .elapsed_secs.map(|s| format!(" exceeded {}s", s)).unwrap_or_default()
    )]
    Timeout {
        operation: String,
        elapsed_secs: Option<u32>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Statement rejected: {reason}")]
    Rejected { reason: RejectionReason },

    #[error(
        "Destructive statement blocked: {keyword}. To proceed, set 'allow_destructive' to true."
    )]
    DestructiveActionBlocked { keyword: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: Some(elapsed_secs),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self::Rejected { reason }
    }

    pub fn destructive_action_blocked(keyword: impl Into<String>) -> Self {
        Self::DestructiveActionBlocked {
            keyword: keyword.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable, machine-readable reason code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_failure",
            Self::Database { .. } => "execution_failure",
            Self::Timeout { .. } => "timeout",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Rejected { reason } => reason.code(),
            Self::DestructiveActionBlocked { .. } => "destructive_action_blocked",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Rejected { .. } => Some(
                "Submit exactly one SELECT or WITH statement without write or DDL keywords",
            ),
            Self::DestructiveActionBlocked { .. } => {
                Some("Re-issue the request with allow_destructive set to true")
            }
            _ => None,
        }
    }

    /// True when the connection itself is unusable, as opposed to a statement failing.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convert sqlx errors to GatewayError.
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => GatewayError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                GatewayError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => GatewayError::database(
                "No rows returned",
                None,
                "Verify the statement conditions match existing data",
            ),
            // The acquire timeout is a pool option; the error does not carry it.
            sqlx::Error::PoolTimedOut => GatewayError::Timeout {
                operation: "connection pool acquire".to_string(),
                elapsed_secs: None,
            },
            sqlx::Error::PoolClosed => {
                GatewayError::connection("Connection pool is closed", "Restart the gateway")
            }
            sqlx::Error::Io(io_err) => GatewayError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => GatewayError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => GatewayError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                GatewayError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                GatewayError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => GatewayError::connection(
                "Database worker crashed",
                "Restart the gateway",
            ),
            _ => GatewayError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Structured error payload: reason code plus optional suggestion.
fn error_data(err: &GatewayError) -> Option<serde_json::Value> {
    let mut data = serde_json::json!({ "kind": err.kind() });
    if let Some(suggestion) = err.suggestion() {
        data["suggestion"] = serde_json::Value::String(suggestion.to_string());
    }
    Some(data)
}

/// Convert GatewayError to MCP ErrorData for semantic error categorization.
impl From<GatewayError> for rmcp::ErrorData {
    fn from(err: GatewayError) -> Self {
        let data = error_data(&err);
        match &err {
            GatewayError::InvalidInput { .. }
            | GatewayError::Rejected { .. }
            | GatewayError::DestructiveActionBlocked { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), data)
            }

            // Surfaced verbatim, with SQLSTATE when the driver reports one
            GatewayError::Database {
                message, sql_state, ..
            } => {
                let msg = match sql_state {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }

            GatewayError::Connection { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), data)
            }
        }
    }
}
