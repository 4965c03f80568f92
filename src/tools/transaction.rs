//! Transactional batch tool.
//!
//! `run_sql_transaction` executes an ordered list of statements atomically: every
//! statement is guarded before the transaction begins, and the first failure
//! rolls the whole batch back.

use crate::db::QueryExecutor;
use crate::error::GatewayResult;
use crate::models::BatchResult;
use crate::tools::guard::AuthorizationContext;
use crate::tools::registry::{Tool, ToolError, ToolResult, ToolSpec, parse_input, to_output};
use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

pub const RUN_SQL_TRANSACTION_TOOL: &str = "run_sql_transaction";

const RUN_SQL_TRANSACTION_DESCRIPTION: &str = "Execute several SQL statements in one transaction. \
     All statements commit together or none do. Results are returned in statement order.";

/// Agent-facing input of `run_sql_transaction`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunSqlTransactionInput {
    /// Statements to execute, in order
    pub statements: Vec<String>,
}

/// MCP-facing input of `run_sql_transaction`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunSqlTransactionRequest {
    /// Statements to execute, in order
    pub statements: Vec<String>,
    /// Set to true to allow DROP and TRUNCATE. Blocked by default.
    #[serde(default)]
    pub allow_destructive: bool,
}

impl RunSqlTransactionRequest {
    pub fn authorization(&self) -> AuthorizationContext {
        AuthorizationContext::new(self.allow_destructive)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionToolHandler {
    executor: QueryExecutor,
}

impl TransactionToolHandler {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    pub async fn run_batch(
        &self,
        statements: &[String],
        ctx: AuthorizationContext,
    ) -> GatewayResult<BatchResult> {
        self.executor.execute_batch(statements, ctx).await
    }
}

pub struct RunSqlTransactionTool {
    spec: ToolSpec,
    handler: TransactionToolHandler,
    ctx: AuthorizationContext,
}

impl RunSqlTransactionTool {
    pub fn new(executor: QueryExecutor, ctx: AuthorizationContext) -> Self {
        Self {
            spec: ToolSpec::for_input::<RunSqlTransactionInput>(
                RUN_SQL_TRANSACTION_TOOL,
                RUN_SQL_TRANSACTION_DESCRIPTION,
            ),
            handler: TransactionToolHandler::new(executor),
            ctx,
        }
    }
}

impl Tool for RunSqlTransactionTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn execute(&self, input: Value) -> BoxFuture<'_, ToolResult<Value>> {
        Box::pin(async move {
            let input: RunSqlTransactionInput = parse_input(RUN_SQL_TRANSACTION_TOOL, input)?;
            let result = self
                .handler
                .run_batch(&input.statements, self.ctx)
                .await
                .map_err(|e| ToolError::from_gateway(RUN_SQL_TRANSACTION_TOOL, e))?;
            to_output(RUN_SQL_TRANSACTION_TOOL, &result)
        })
    }
}
