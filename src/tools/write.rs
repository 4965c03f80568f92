//! Single-statement execution tool.
//!
//! `run_sql` runs one arbitrary statement after the destructive-action guard.
//! Agent sessions get the authorization fixed when the tool set is built; the
//! MCP surface takes it per request.

use crate::db::QueryExecutor;
use crate::error::GatewayResult;
use crate::models::{StatementOutcome, StatementResult};
use crate::tools::guard::AuthorizationContext;
use crate::tools::registry::{Tool, ToolError, ToolResult, ToolSpec, parse_input, to_output};
use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RUN_SQL_TOOL: &str = "run_sql";

const RUN_SQL_DESCRIPTION: &str = "Execute a single SQL statement and return its rows or affected-row count. \
     DROP and TRUNCATE are refused unless the session is authorized for destructive actions.";

/// Agent-facing input of `run_sql`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunSqlInput {
    /// SQL statement to execute
    pub sql: String,
}

/// MCP-facing input of `run_sql`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunSqlRequest {
    /// SQL statement to execute
    pub sql: String,
    /// Set to true to allow DROP and TRUNCATE. Blocked by default.
    #[serde(default)]
    pub allow_destructive: bool,
}

impl RunSqlRequest {
    pub fn authorization(&self) -> AuthorizationContext {
        AuthorizationContext::new(self.allow_destructive)
    }
}

/// Output of `run_sql`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RunSqlOutput {
    /// Rows for row-returning statements, otherwise the affected-row count
    pub result: StatementOutcome,
    pub execution_time_ms: u64,
}

impl From<StatementResult> for RunSqlOutput {
    fn from(result: StatementResult) -> Self {
        Self {
            result: result.outcome,
            execution_time_ms: result.execution_time_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteToolHandler {
    executor: QueryExecutor,
}

impl WriteToolHandler {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    pub async fn run_sql(
        &self,
        sql: &str,
        ctx: AuthorizationContext,
    ) -> GatewayResult<RunSqlOutput> {
        self.executor
            .execute_statement(sql, ctx)
            .await
            .map(RunSqlOutput::from)
    }
}

/// `run_sql` bound to one session's authorization.
pub struct RunSqlTool {
    spec: ToolSpec,
    handler: WriteToolHandler,
    ctx: AuthorizationContext,
}

impl RunSqlTool {
    pub fn new(executor: QueryExecutor, ctx: AuthorizationContext) -> Self {
        Self {
            spec: ToolSpec::for_input::<RunSqlInput>(RUN_SQL_TOOL, RUN_SQL_DESCRIPTION),
            handler: WriteToolHandler::new(executor),
            ctx,
        }
    }
}

impl Tool for RunSqlTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, ToolResult<Value>> {
        Box::pin(async move {
            let input: RunSqlInput = parse_input(RUN_SQL_TOOL, input)?;
            let result = self
                .handler
                .run_sql(&input.sql, self.ctx)
                .await
                .map_err(|e| ToolError::from_gateway(RUN_SQL_TOOL, e))?;
            to_output(RUN_SQL_TOOL, &result)
        })
    }
}
