//! Data models for the SQL gateway.

pub mod connection;
pub mod query;

pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use query::{
    BatchResult, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, JsonRow, MAX_QUERY_TIMEOUT_SECS,
    MAX_ROW_LIMIT, QueryResult, StatementOutcome, StatementResult,
};
