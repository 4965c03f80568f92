//! Read-only SQL gateway.
//!
//! Raw SQL from a caller goes through the statement classifier; only the
//! normalized statement it produces is ever sent to the database.

use crate::db::QueryExecutor;
use crate::error::GatewayResult;
use crate::models::{JsonRow, MAX_ROW_LIMIT, QueryResult};
use crate::tools::sql_validator;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Input for the query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// A single SELECT or WITH statement. Anything else is rejected.
    pub sql: String,
    /// Maximum rows to return. Default: 100, max: 10000
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Output from the query tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    /// Rows as column name to value maps
    pub rows: Vec<JsonRow>,
    /// True if more rows existed than the limit
    pub truncated: bool,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl QueryOutput {
    fn from_result(result: QueryResult, warning: Option<String>) -> Self {
        Self {
            row_count: result.row_count(),
            columns: result.columns,
            rows: result.rows,
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
            warning,
        }
    }
}

fn limit_warning(requested: Option<u32>) -> Option<String> {
    match requested {
        Some(limit) if limit > MAX_ROW_LIMIT => Some(format!(
            "Requested limit {} exceeds maximum allowed ({}). Results capped to {} rows.",
            limit, MAX_ROW_LIMIT, MAX_ROW_LIMIT
        )),
        Some(0) => Some("A limit of 0 is not allowed. Returning at most 1 row.".to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct QueryToolHandler {
    executor: QueryExecutor,
}

impl QueryToolHandler {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Classify and, if accepted, execute the normalized statement.
    pub async fn query(&self, input: QueryInput) -> GatewayResult<QueryOutput> {
        let statement = match sql_validator::validate_readonly(&input.sql) {
            Ok(statement) => statement,
            Err(err) => {
                debug!(sql = %input.sql, error = %err, "Query rejected by classifier");
                return Err(err);
            }
        };

        let result = self.executor.execute_query(&statement, input.limit).await?;

        info!(
            row_count = result.row_count(),
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );

        Ok(QueryOutput::from_result(result, limit_warning(input.limit)))
    }
}
