//! Statement result models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row limit for row-returning statements.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Default statement timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u32 = 30;

/// Maximum statement timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u32 = 300;

pub type JsonRow = serde_json::Map<String, JsonValue>;

/// What a single executed statement produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementOutcome {
    /// Row-returning statement (SELECT, RETURNING, PRAGMA, ...)
    Rows {
        columns: Vec<String>,
        rows: Vec<JsonRow>,
        /// True when more rows existed than the row limit
        truncated: bool,
    },
    /// Data-modifying or DDL statement
    Affected { rows_affected: u64 },
}

impl StatementOutcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self::Affected { rows_affected }
    }

    pub fn empty_rows() -> Self {
        Self::Rows {
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
        }
    }

    /// Number of rows returned, zero for non-row statements.
    pub fn row_count(&self) -> usize {
        match self {
            Self::Rows { rows, .. } => rows.len(),
            Self::Affected { .. } => 0,
        }
    }

    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::Affected { rows_affected } => Some(*rows_affected),
            Self::Rows { .. } => None,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Rows { truncated: true, .. })
    }
}

/// Result of the read-only gateway.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<JsonRow>,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Result of a single statement run outside a batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatementResult {
    #[serde(flatten)]
    pub outcome: StatementOutcome,
    pub execution_time_ms: u64,
}

/// Ordered per-statement results of a committed batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchResult {
    pub results: Vec<StatementOutcome>,
    pub execution_time_ms: u64,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
