//! Statement execution.
//!
//! - [`QueryExecutor`] runs single statements: the read-only gateway path and the
//!   guarded `run_sql` path.
//! - [`execute_batch`] is the transactional executor: guard every statement,
//!   then begin, run in order, commit; roll back on the first failure.
//!
//! Both go through a [`StatementRunner`], so the batch semantics are testable
//! without a database.

use crate::db::pool::Database;
use crate::db::session::StatementRunner;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    BatchResult, DatabaseType, MAX_ROW_LIMIT, QueryResult, StatementOutcome, StatementResult,
};
use crate::tools::guard::{self, AuthorizationContext};
use crate::tools::sql_validator::{ReadOnlyStatement, first_keyword_match, strip_comments};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs single statements against the gateway's database.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    database: Database,
}

impl QueryExecutor {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Execute a classified read-only statement.
    ///
    /// `limit` overrides the configured row limit, clamped to [1, 10000].
    pub async fn execute_query(
        &self,
        statement: &ReadOnlyStatement,
        limit: Option<u32>,
    ) -> GatewayResult<QueryResult> {
        guard::enforce(statement.as_str(), AuthorizationContext::read_only())?;

        let start = Instant::now();
        let row_limit = limit
            .map(|l| l.clamp(1, MAX_ROW_LIMIT))
            .unwrap_or(self.database.row_limit());
        let mut session = self.database.session().with_row_limit(row_limit);
        let outcome = session.execute(statement.as_str()).await?;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            StatementOutcome::Rows {
                columns,
                rows,
                truncated,
            } => QueryResult {
                columns,
                rows,
                truncated,
                execution_time_ms,
            },
            StatementOutcome::Affected { .. } => QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                truncated: false,
                execution_time_ms,
            },
        };

        debug!(
            rows = result.row_count(),
            truncated = result.truncated,
            elapsed_ms = execution_time_ms,
            "Query executed"
        );
        Ok(result)
    }

    /// Execute one arbitrary statement after the destructive-action guard.
    pub async fn execute_statement(
        &self,
        sql: &str,
        ctx: AuthorizationContext,
    ) -> GatewayResult<StatementResult> {
        if sql.trim().is_empty() {
            return Err(GatewayError::invalid_input("SQL statement must not be empty"));
        }
        guard::enforce(sql, ctx)?;
        reject_transaction_control(None, sql)?;

        let start = Instant::now();
        let mut session = self.database.session();
        let outcome = session.execute(sql).await?;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        info!(
            rows_affected = ?outcome.rows_affected(),
            elapsed_ms = execution_time_ms,
            "Statement executed"
        );
        Ok(StatementResult {
            outcome,
            execution_time_ms,
        })
    }

    /// Execute a batch atomically on a fresh pooled session.
    pub async fn execute_batch(
        &self,
        statements: &[String],
        ctx: AuthorizationContext,
    ) -> GatewayResult<BatchResult> {
        let mut session = self.database.session();
        execute_batch(&mut session, statements, ctx).await
    }
}

/// Execute `statements` atomically through `runner`.
///
/// Every statement is checked by the destructive-action guard, and for
/// transaction control, before any database command is issued. On an execution error the transaction is rolled back and
/// the original error is returned; a failed rollback is logged, never reported
/// in its place.
pub async fn execute_batch<R: StatementRunner>(
    runner: &mut R,
    statements: &[String],
    ctx: AuthorizationContext,
) -> GatewayResult<BatchResult> {
    if statements.is_empty() {
        return Err(GatewayError::invalid_input(
            "A batch must contain at least one statement",
        ));
    }

    for (index, sql) in statements.iter().enumerate() {
        if sql.trim().is_empty() {
            return Err(GatewayError::invalid_input(format!(
                "Statement {} is empty",
                index
            )));
        }
        if let Err(err) =
            guard::enforce(sql, ctx).and_then(|()| reject_transaction_control(Some(index), sql))
        {
            debug!(statement_index = index, "Batch rejected before begin");
            return Err(err);
        }
    }

    let start = Instant::now();
    runner.begin().await?;

    let mut results = Vec::with_capacity(statements.len());
    for (index, sql) in statements.iter().enumerate() {
        match runner.execute(sql).await {
            Ok(outcome) => results.push(outcome),
            Err(err) => {
                if let Err(rollback_err) = runner.rollback().await {
                    error!(
                        statement_index = index,
                        error = %rollback_err,
                        original_error = %err,
                        "Rollback failed after statement error"
                    );
                }
                warn!(
                    statement_index = index,
                    error = %err,
                    "Batch failed and was rolled back"
                );
                return Err(err);
            }
        }
    }

    runner.commit().await?;

    let execution_time_ms = start.elapsed().as_millis() as u64;
    info!(
        statement_count = results.len(),
        elapsed_ms = execution_time_ms,
        "Batch committed"
    );

    Ok(BatchResult {
        results,
        execution_time_ms,
    })
}

/// Leading keywords of transaction-control statements.
const TRANSACTION_KEYWORDS: &[&str] = &[
    "begin",
    "start",
    "commit",
    "end",
    "rollback",
    "abort",
    "savepoint",
    "release",
];

/// Name the transaction-control statement inside `sql`, if any.
///
/// Every statement in the text is checked, so `INSERT ...; COMMIT` is caught.
/// Parsed with the generic dialect; text that does not parse is split on `;`
/// and each piece is judged by its leading keyword.
pub fn find_transaction_control(sql: &str) -> Option<&'static str> {
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements.iter().find_map(transaction_control_name),
        Err(_) => strip_comments(sql).split(';').find_map(|piece| {
            let word = piece
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_lowercase();
            TRANSACTION_KEYWORDS.iter().copied().find(|k| *k == word)
        }),
    }
}

fn transaction_control_name(stmt: &Statement) -> Option<&'static str> {
    match stmt {
        Statement::StartTransaction { .. } => Some("BEGIN"),
        Statement::Commit { .. } => Some("COMMIT"),
        Statement::Rollback { .. } => Some("ROLLBACK"),
        Statement::Savepoint { .. } => Some("SAVEPOINT"),
        Statement::ReleaseSavepoint { .. } => Some("RELEASE SAVEPOINT"),
        _ => None,
    }
}

fn reject_transaction_control(index: Option<usize>, sql: &str) -> GatewayResult<()> {
    let Some(keyword) = find_transaction_control(sql) else {
        return Ok(());
    };
    let subject = match index {
        Some(index) => format!("Statement {}", index),
        None => "The statement".to_string(),
    };
    Err(GatewayError::invalid_input(format!(
        "{} contains transaction control ({}); transactions are managed by the gateway, use run_sql_transaction for atomic batches",
        subject, keyword
    )))
}

fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Whether a statement produces a result set rather than an affected-row count.
///
/// Decided from the parsed AST: queries, EXPLAIN, SHOW, PRAGMA, and writes with a
/// `RETURNING` clause. When the text does not parse, a whole-word `returning` or
/// the leading keyword decides.
pub fn returns_rows(sql: &str, db_type: DatabaseType) -> bool {
    let dialect = get_dialect(db_type);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements.last().is_some_and(is_row_returning),
        Err(_) => {
            let stripped = strip_comments(sql);
            first_keyword_match(&stripped, &["returning"]).is_some()
                || leading_keyword_returns_rows(&stripped)
        }
    }
}

fn is_row_returning(stmt: &Statement) -> bool {
    match stmt {
        Statement::Insert(insert) => insert.returning.is_some(),
        Statement::Update(update) => update.returning.is_some(),
        Statement::Delete(delete) => delete.returning.is_some(),
        other => is_query_like(other),
    }
}

fn is_query_like(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Query(_)
            | Statement::Explain { .. }
            | Statement::ExplainTable { .. }
            | Statement::Pragma { .. }
            | Statement::ShowCreate { .. }
            | Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowDatabases { .. }
            | Statement::ShowSchemas { .. }
            | Statement::ShowFunctions { .. }
            | Statement::ShowVariable { .. }
            | Statement::ShowVariables { .. }
            | Statement::ShowStatus { .. }
            | Statement::ShowCollation { .. }
    )
}

fn leading_keyword_returns_rows(stripped: &str) -> bool {
    let Some(first) = stripped.split_whitespace().next() else {
        return false;
    };
    let first = first.trim_start_matches('(').to_ascii_lowercase();
    matches!(
        first.as_str(),
        "select" | "with" | "values" | "table" | "explain" | "show" | "pragma"
    )
}
