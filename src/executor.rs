//! Execution of a single generated statement against the live database.
//!
//! A statement that declares result columns is treated as row-returning and
//! every row is materialized; anything else reports the number of rows it
//! changed. Each execution gets its own connection and transaction, and a
//! failed statement is rolled back and never retried. Text holding several
//! statements never runs, even when only the first would compile.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rusqlite::{Batch, Connection, ErrorCode, Statement, types::ValueRef};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{error::QueryError, schema::LiveDatabase, translator::TranslatedStatement};

/// Default per-statement time limit
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Virtual machine steps between deadline checks
const PROGRESS_STEPS: i32 = 1_000;

/// One result row: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

/// Shape of a statement outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Statement produced a result set
    Rows { rows: Vec<Row>, row_count: usize },
    /// Statement changed data or structure
    Affected { affected: usize }
}

/// Normalized statement outcome with a human-readable summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub message: String
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            message: format!("{} row(s) returned.", row_count),
            outcome: Outcome::Rows {
                rows,
                row_count
            }
        }
    }

    pub fn from_affected(affected: usize) -> Self {
        Self {
            message: format!(
                "Query executed successfully. {} row(s) affected.",
                affected
            ),
            outcome: Outcome::Affected {
                affected
            }
        }
    }

    /// Returned rows; empty for statements that do not return rows
    pub fn rows(&self) -> &[Row] {
        match &self.outcome {
            Outcome::Rows {
                rows, ..
            } => rows,
            Outcome::Affected {
                ..
            } => &[]
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self.outcome {
            Outcome::Rows {
                rows, ..
            } => rows,
            Outcome::Affected {
                ..
            } => Vec::new()
        }
    }

    pub fn is_row_returning(&self) -> bool {
        matches!(self.outcome, Outcome::Rows { .. })
    }
}

/// Runs translated statements with a bounded execution time.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    timeout: Duration
}

impl Default for SqlExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_STATEMENT_TIMEOUT)
    }
}

impl SqlExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `statement` exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Execution`] with the engine message when the
    /// statement fails or exceeds the time limit. The transaction is rolled
    /// back in both cases.
    pub async fn execute(
        &self,
        db: &LiveDatabase<'_>,
        statement: &TranslatedStatement
    ) -> Result<QueryResult, QueryError> {
        let mut conn = db
            .connect()
            .map_err(|e| QueryError::Execution(e.to_string()))?;
        let sql = statement.as_str().to_string();
        let timeout = self.timeout;
        let result = tokio::task::spawn_blocking(move || run_statement(&mut conn, &sql, timeout))
            .await
            .map_err(|e| QueryError::Execution(format!("execution task failed: {}", e)))??;
        debug!(
            row_returning = result.is_row_returning(),
            message = %result.message,
            "statement executed"
        );
        Ok(result)
    }
}

/// Execute one statement in its own transaction on `conn`.
///
/// Text holding more than one statement is rejected before anything runs.
pub fn run_statement(
    conn: &mut Connection,
    sql: &str,
    timeout: Duration
) -> Result<QueryResult, QueryError> {
    let deadline = Instant::now() + timeout;
    conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
    let tx = conn
        .transaction()
        .map_err(|e| execution_error(e, timeout))?;
    let outcome = prepare_single(&tx, sql, timeout)
        .and_then(|stmt| execute_once(stmt).map_err(|e| execution_error(e, timeout)));
    match outcome {
        Ok(result) => {
            tx.commit().map_err(|e| execution_error(e, timeout))?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback() {
                debug!(error = %rollback, "rollback after failed statement also failed");
            }
            Err(e)
        }
    }
}

/// Prepare the only statement in `sql`.
///
/// `Connection::prepare` compiles the first statement and ignores the tail,
/// so the tail is walked with a [`Batch`] and must be empty.
fn prepare_single<'conn>(
    conn: &'conn Connection,
    sql: &str,
    timeout: Duration
) -> Result<Statement<'conn>, QueryError> {
    let mut batch = Batch::new(conn, sql);
    let stmt = batch
        .next()
        .map_err(|e| execution_error(e, timeout))?
        .ok_or_else(|| QueryError::Translation("generated SQL contains no statement".into()))?;
    match batch.next() {
        Ok(None) => Ok(stmt),
        // a tail that fails to compile is still a second statement
        Ok(Some(_)) | Err(_) => Err(QueryError::Translation(
            "expected exactly one SQL statement, got several; nothing was executed".into()
        ))
    }
}

fn execute_once(mut stmt: Statement<'_>) -> rusqlite::Result<QueryResult> {
    if stmt.column_count() == 0 {
        let affected = stmt.execute([])?;
        return Ok(QueryResult::from_affected(affected));
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut mapped = Row::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            mapped.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(mapped);
    }
    Ok(QueryResult::from_rows(out))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
    }
}

fn execution_error(err: rusqlite::Error, timeout: Duration) -> QueryError {
    if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        return QueryError::Execution(format!(
            "statement exceeded the {}ms time limit and was cancelled",
            timeout.as_millis()
        ));
    }
    QueryError::Execution(err.to_string())
}
