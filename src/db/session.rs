//! Statement runners.
//!
//! [`StatementRunner`] is the seam between the transactional executor and the
//! database: begin, execute, commit, rollback. [`PooledSession`] is the real
//! implementation over a sqlx pool. Tests substitute recording fakes.

use crate::db::executor::returns_rows;
use crate::db::pool::{DbPool, DbTransaction};
use crate::db::types::RowToJson;
use crate::error::{GatewayError, GatewayResult};
use crate::models::StatementOutcome;
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Executes statements against one database, optionally inside a transaction.
///
/// Calls are strictly sequential: each future is awaited before the next call.
pub trait StatementRunner: Send {
    /// Open a transaction. Subsequent statements run inside it.
    fn begin(&mut self) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Execute one statement and report what it produced.
    fn execute(&mut self, sql: &str) -> impl Future<Output = GatewayResult<StatementOutcome>> + Send;

    fn commit(&mut self) -> impl Future<Output = GatewayResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = GatewayResult<()>> + Send;
}

/// Pool-backed runner scoped to one batch or one tool call.
///
/// Owns its transaction: dropping the session while a transaction is open
/// (for example when the surrounding request is cancelled) rolls it back.
#[derive(Debug)]
pub struct PooledSession {
    pool: DbPool,
    tx: Option<DbTransaction>,
    statement_timeout: Duration,
    row_limit: u32,
}

impl PooledSession {
    pub fn new(pool: DbPool, statement_timeout: Duration, row_limit: u32) -> Self {
        Self {
            pool,
            tx: None,
            statement_timeout,
            row_limit: row_limit.max(1),
        }
    }

    /// Override the row limit for subsequent statements.
    pub fn with_row_limit(mut self, row_limit: u32) -> Self {
        self.row_limit = row_limit.max(1);
        self
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}

impl StatementRunner for PooledSession {
    async fn begin(&mut self) -> GatewayResult<()> {
        if self.tx.is_some() {
            return Err(GatewayError::internal("Transaction already open"));
        }
        self.tx = Some(self.pool.begin().await?);
        debug!("Transaction started");
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> GatewayResult<StatementOutcome> {
        let wants_rows = returns_rows(sql, self.pool.db_type());
        let limit = self.row_limit;
        let statement_timeout = self.statement_timeout;

        debug!(
            sql = %sql,
            returns_rows = wants_rows,
            in_transaction = self.tx.is_some(),
            "Executing statement"
        );

        match (&mut self.tx, &self.pool) {
            (Some(DbTransaction::Postgres(tx)), _) => {
                postgres::run(&mut **tx, sql, wants_rows, limit, statement_timeout).await
            }
            (Some(DbTransaction::SQLite(tx)), _) => {
                sqlite::run(&mut **tx, sql, wants_rows, limit, statement_timeout).await
            }
            (None, DbPool::Postgres(pool)) => {
                postgres::run(pool, sql, wants_rows, limit, statement_timeout).await
            }
            (None, DbPool::SQLite(pool)) => {
                sqlite::run(pool, sql, wants_rows, limit, statement_timeout).await
            }
        }
    }

    async fn commit(&mut self) -> GatewayResult<()> {
        match self.tx.take() {
            Some(tx) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(())
            }
            None => Err(GatewayError::internal("No open transaction to commit")),
        }
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        match self.tx.take() {
            Some(tx) => {
                tx.rollback().await?;
                debug!("Transaction rolled back");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Turn fetched rows into an outcome, cutting at the row limit.
fn rows_outcome<R: RowToJson>(rows: Vec<R>, row_limit: u32) -> StatementOutcome {
    let Some(first) = rows.first() else {
        return StatementOutcome::empty_rows();
    };

    let columns = first.column_names();
    let truncated = rows.len() > row_limit as usize;
    let json_rows = rows
        .iter()
        .take(row_limit as usize)
        .map(RowToJson::to_json_map)
        .collect();

    if truncated {
        warn!(limit = row_limit, "Statement result truncated");
    }

    StatementOutcome::Rows {
        columns,
        rows: json_rows,
        truncated,
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> GatewayResult<Vec<R>> {
    results
        .into_iter()
        .map(|r| r.map_err(GatewayError::from))
        .collect()
}

fn timeout_error(limit: Duration) -> GatewayError {
    GatewayError::timeout("statement execution", limit.as_secs() as u32)
}

// Per-backend runners; only the row type differs.

mod postgres {
    use super::*;
    use sqlx::Executor;

    pub async fn run<'c, E>(
        executor: E,
        sql: &'c str,
        wants_rows: bool,
        row_limit: u32,
        statement_timeout: Duration,
    ) -> GatewayResult<StatementOutcome>
    where
        E: Executor<'c, Database = sqlx::Postgres>,
    {
        if wants_rows {
            // One extra row tells us whether the result was cut
            let fetch_limit = row_limit as usize + 1;
            let rows_future = executor.fetch(sql).take(fetch_limit).collect::<Vec<_>>();
            match timeout(statement_timeout, rows_future).await {
                Ok(results) => Ok(rows_outcome(collect_rows(results)?, row_limit)),
                Err(_) => Err(timeout_error(statement_timeout)),
            }
        } else {
            match timeout(statement_timeout, executor.execute(sql)).await {
                Ok(Ok(r)) => Ok(StatementOutcome::affected(r.rows_affected())),
                Ok(Err(e)) => Err(GatewayError::from(e)),
                Err(_) => Err(timeout_error(statement_timeout)),
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::Executor;

    pub async fn run<'c, E>(
        executor: E,
        sql: &'c str,
        wants_rows: bool,
        row_limit: u32,
        statement_timeout: Duration,
    ) -> GatewayResult<StatementOutcome>
    where
        E: Executor<'c, Database = sqlx::Sqlite>,
    {
        if wants_rows {
            let fetch_limit = row_limit as usize + 1;
            let rows_future = executor.fetch(sql).take(fetch_limit).collect::<Vec<_>>();
            match timeout(statement_timeout, rows_future).await {
                Ok(results) => Ok(rows_outcome(collect_rows(results)?, row_limit)),
                Err(_) => Err(timeout_error(statement_timeout)),
            }
        } else {
            match timeout(statement_timeout, executor.execute(sql)).await {
                Ok(Ok(r)) => Ok(StatementOutcome::affected(r.rows_affected())),
                Ok(Err(e)) => Err(GatewayError::from(e)),
                Err(_) => Err(timeout_error(statement_timeout)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn session() -> PooledSession {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        PooledSession::new(DbPool::SQLite(pool), Duration::from_secs(5), 2)
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let mut s = session().await;
        let outcome = s.execute("CREATE TABLE t (id INTEGER, name TEXT)").await.unwrap();
        assert_eq!(outcome.rows_affected(), Some(0));

        let outcome = s
            .execute("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c')")
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected(), Some(3));
    }

    #[tokio::test]
    async fn test_select_is_truncated_at_row_limit() {
        let mut s = session().await;
        s.execute("CREATE TABLE t (id INTEGER)").await.unwrap();
        s.execute("INSERT INTO t VALUES (1), (2), (3)").await.unwrap();

        let outcome = s.execute("SELECT id FROM t ORDER BY id").await.unwrap();
        match outcome {
            StatementOutcome::Rows {
                columns,
                rows,
                truncated,
            } => {
                assert_eq!(columns, vec!["id".to_string()]);
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0]["id"], 1);
                assert!(truncated);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_select_returns_empty_rows() {
        let mut s = session().await;
        s.execute("CREATE TABLE t (id INTEGER)").await.unwrap();
        let outcome = s.execute("SELECT id FROM t").await.unwrap();
        assert_eq!(outcome, StatementOutcome::empty_rows());
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let mut s = session().await;
        s.execute("CREATE TABLE t (id INTEGER)").await.unwrap();

        s.begin().await.unwrap();
        assert!(s.in_transaction());
        s.execute("INSERT INTO t VALUES (1)").await.unwrap();
        s.rollback().await.unwrap();
        assert!(!s.in_transaction());

        let outcome = s.execute("SELECT COUNT(*) AS n FROM t").await.unwrap();
        let StatementOutcome::Rows { rows, .. } = outcome else {
            panic!("expected rows");
        };
        assert_eq!(rows[0]["n"], 0);
    }

    #[tokio::test]
    async fn test_commit_without_begin_fails() {
        let mut s = session().await;
        assert!(s.commit().await.is_err());
        assert!(s.rollback().await.is_ok());
    }

    #[tokio::test]
    async fn test_double_begin_fails() {
        let mut s = session().await;
        s.begin().await.unwrap();
        assert!(s.begin().await.is_err());
        s.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_database_error_maps_to_execution_failure() {
        let mut s = session().await;
        let err = s.execute("SELECT * FROM missing_table").await.unwrap_err();
        assert_eq!(err.kind(), "execution_failure");
    }
}
