//! MCP service implementation using rmcp.
//!
//! `GatewayService` exposes the read-only gateway and the two write tools over
//! the MCP protocol. Authorization for destructive statements is taken from
//! each request.

use crate::agent::{AgentConfig, AgentRunner, Reasoner};
use crate::db::QueryExecutor;
use crate::models::BatchResult;
use crate::tools::AuthorizationContext;
use crate::tools::query::{QueryInput, QueryOutput, QueryToolHandler};
use crate::tools::transaction::{RunSqlTransactionRequest, TransactionToolHandler};
use crate::tools::write::{RunSqlOutput, RunSqlRequest, WriteToolHandler};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct GatewayService {
    executor: QueryExecutor,
    agent_config: AgentConfig,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(executor: QueryExecutor, agent_config: AgentConfig) -> Self {
        Self {
            executor,
            agent_config,
            tool_router: Self::tool_router(),
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Agent runner over this service's database, bound to `ctx`.
    pub fn agent_runner(
        &self,
        reasoner: Arc<dyn Reasoner>,
        ctx: AuthorizationContext,
    ) -> AgentRunner {
        AgentRunner::for_database(&self.executor, ctx, reasoner, self.agent_config)
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "Execute a single read-only query (SELECT or WITH) and return results.\nComments are stripped; data-modifying keywords and multiple statements are rejected with a reason code.\nRows are capped by `limit` (default 100, max 10000)."
    )]
    async fn query(
        &self,
        Parameters(input): Parameters<QueryInput>,
    ) -> Result<Json<QueryOutput>, McpError> {
        let handler = QueryToolHandler::new(self.executor.clone());
        handler
            .query(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Execute one SQL statement of any kind (INSERT, UPDATE, DELETE, DDL, SELECT).\nDROP and TRUNCATE are blocked unless `allow_destructive` is true."
    )]
    async fn run_sql(
        &self,
        Parameters(input): Parameters<RunSqlRequest>,
    ) -> Result<Json<RunSqlOutput>, McpError> {
        let ctx = input.authorization();
        debug!(allow_destructive = ctx.allow_destructive, "run_sql requested");
        let handler = WriteToolHandler::new(self.executor.clone());
        handler
            .run_sql(&input.sql, ctx)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Execute several SQL statements atomically in one transaction.\nEvery statement is checked before the transaction begins; BEGIN, COMMIT, ROLLBACK and SAVEPOINT are refused. The first failure rolls back the whole batch.\nDROP and TRUNCATE are blocked unless `allow_destructive` is true."
    )]
    async fn run_sql_transaction(
        &self,
        Parameters(input): Parameters<RunSqlTransactionRequest>,
    ) -> Result<Json<BatchResult>, McpError> {
        let ctx = input.authorization();
        let handler = TransactionToolHandler::new(self.executor.clone());
        handler
            .run_batch(&input.statements, ctx)
            .await
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sql-agent-gateway".to_owned(),
                title: Some("SQL Agent Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "SQL tools over a single configured database.\n\
                \n\
                ## Tools\n\
                - `query`: read-only SELECT/WITH statements. One statement per call.\n\
                - `run_sql`: any single statement.\n\
                - `run_sql_transaction`: an ordered list of statements, committed together or not at all.\n\
                \n\
                ## Destructive statements\n\
                Statements containing DROP or TRUNCATE are refused with `destructive_action_blocked`\n\
                unless `allow_destructive` is set to true on the request.\n\
                \n\
                ## Errors\n\
                Rejections carry a reason code in the error data (`kind`), e.g. `not_read_only`,\n\
                `forbidden_keyword`, `multiple_statements`, `execution_failure`."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DbPool};
    use crate::models::StatementOutcome;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn create_test_service() -> GatewayService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let database = Database::from_pool(DbPool::SQLite(pool), Duration::from_secs(5), 100);
        GatewayService::new(QueryExecutor::new(database), AgentConfig::default())
    }

    #[tokio::test]
    async fn test_server_info() {
        let service = create_test_service().await;
        let info = service.get_info();
        assert_eq!(info.server_info.name, "sql-agent-gateway");
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_run_sql_then_query() {
        let service = create_test_service().await;
        service
            .run_sql(Parameters(RunSqlRequest {
                sql: "CREATE TABLE users (id INTEGER, name TEXT)".to_string(),
                allow_destructive: false,
            }))
            .await
            .unwrap();
        let Json(inserted) = service
            .run_sql(Parameters(RunSqlRequest {
                sql: "INSERT INTO users VALUES (1, 'ada'), (2, 'bob')".to_string(),
                allow_destructive: false,
            }))
            .await
            .unwrap();
        assert_eq!(inserted.result, StatementOutcome::affected(2));

        let Json(output) = service
            .query(Parameters(QueryInput {
                sql: "-- list users\nSELECT name FROM users ORDER BY id".to_string(),
                limit: None,
            }))
            .await
            .unwrap();
        assert_eq!(output.row_count, 2);
        assert_eq!(output.rows[0]["name"], "ada");
    }

    #[tokio::test]
    async fn test_query_rejects_writes() {
        let service = create_test_service().await;
        let err = service
            .query(Parameters(QueryInput {
                sql: "DELETE FROM users".to_string(),
                limit: None,
            }))
            .await
            .err()
            .expect("expected error");
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_run_sql_blocks_drop_without_authorization() {
        let service = create_test_service().await;
        let err = service
            .run_sql(Parameters(RunSqlRequest {
                sql: "DROP TABLE users".to_string(),
                allow_destructive: false,
            }))
            .await
            .err()
            .expect("expected error");
        assert!(err.message.contains("drop"));
    }

    #[tokio::test]
    async fn test_run_sql_transaction() {
        let service = create_test_service().await;
        let Json(batch) = service
            .run_sql_transaction(Parameters(RunSqlTransactionRequest {
                statements: vec![
                    "CREATE TABLE t (id INTEGER)".to_string(),
                    "INSERT INTO t VALUES (1)".to_string(),
                    "SELECT id FROM t".to_string(),
                ],
                allow_destructive: false,
            }))
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.results[1].rows_affected(), Some(1));
        assert_eq!(batch.results[2].row_count(), 1);
    }
}
