//! SQL tools.
//!
//! - `sql_validator`: statement classifier for the read-only gateway
//! - `guard`: destructive-action guard and authorization context
//! - `query`: read-only gateway handler
//! - `write`: `run_sql`
//! - `transaction`: `run_sql_transaction`
//! - `registry`: tool trait and the name → tool registry used by agent sessions

pub mod guard;
pub mod query;
pub mod registry;
pub mod sql_validator;
pub mod transaction;
pub mod write;

pub use guard::AuthorizationContext;
pub use query::{QueryInput, QueryOutput, QueryToolHandler};
pub use registry::{
    CollisionPolicy, Tool, ToolError, ToolOrigin, ToolRegistry, ToolResult, ToolSpec,
};
pub use transaction::{
    RunSqlTransactionInput, RunSqlTransactionRequest, RunSqlTransactionTool,
    TransactionToolHandler,
};
pub use write::{RunSqlInput, RunSqlOutput, RunSqlRequest, RunSqlTool, WriteToolHandler};

use crate::agent::provider::ExternalToolBundle;
use crate::db::QueryExecutor;
use std::sync::Arc;

/// The local tools every agent session gets, bound to `ctx`.
pub fn local_tools(executor: &QueryExecutor, ctx: AuthorizationContext) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(RunSqlTool::new(executor.clone(), ctx)),
        Arc::new(RunSqlTransactionTool::new(executor.clone(), ctx)),
    ]
}

/// Local tools plus the bundle's tools, merged under `policy`.
pub fn build_tools(
    executor: &QueryExecutor,
    ctx: AuthorizationContext,
    bundle: Option<&ExternalToolBundle>,
    policy: CollisionPolicy,
) -> ToolResult<ToolRegistry> {
    ToolRegistry::assemble(local_tools(executor, ctx), bundle, policy)
}
