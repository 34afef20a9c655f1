mod common;

use std::time::Duration;

use common::{SCHEMA_T, temp_store};
use serde_json::json;
use sql_query_assistant::{
    error::QueryError,
    executor::{DEFAULT_STATEMENT_TIMEOUT, Outcome, QueryResult, SqlExecutor},
    translator::TranslatedStatement
};

async fn run(store: &sql_query_assistant::schema::SchemaStore, sql: &str) -> Result<QueryResult, QueryError> {
    let live = store.live().await;
    SqlExecutor::default()
        .execute(&live, &TranslatedStatement::new(sql))
        .await
}

#[tokio::test]
async fn test_count_on_empty_table() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    let result = run(&store, "SELECT COUNT(*) FROM t;").await.unwrap();
    assert_eq!(result.message, "1 row(s) returned.");
    assert_eq!(result.rows().len(), 1);
    assert_eq!(result.rows()[0]["COUNT(*)"], json!(0));
}

#[tokio::test]
async fn test_insert_reports_affected_rows() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    let result = run(&store, "INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b');")
        .await
        .unwrap();
    assert_eq!(result.message, "Query executed successfully. 2 row(s) affected.");
    assert!(result.rows().is_empty());
    assert_eq!(result.outcome, Outcome::Affected { affected: 2 });
}

#[tokio::test]
async fn test_rows_preserve_column_and_row_order() {
    let (_dir, store) = temp_store();
    store
        .replace_schema("CREATE TABLE p (z TEXT, a INTEGER, m REAL, b BLOB, n TEXT);")
        .await
        .unwrap();
    run(&store, "INSERT INTO p VALUES ('first', 2, 1.5, x'0102', NULL), ('second', 1, 0.0, NULL, 'n')")
        .await
        .unwrap();
    let result = run(&store, "SELECT z, a, m, b, n FROM p ORDER BY a DESC").await.unwrap();
    let rows = result.rows();
    assert_eq!(rows.len(), 2);
    let columns: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(columns, ["z", "a", "m", "b", "n"]);
    assert_eq!(rows[0]["z"], json!("first"));
    assert_eq!(rows[0]["m"], json!(1.5));
    assert_eq!(rows[0]["b"], json!([1, 2]));
    assert_eq!(rows[0]["n"], json!(null));
    assert_eq!(rows[1]["z"], json!("second"));
    assert_eq!(
        result.outcome,
        Outcome::Rows {
            rows:      rows.to_vec(),
            row_count: 2
        }
    );
}

#[tokio::test]
async fn test_select_does_not_mutate() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    run(&store, "INSERT INTO t VALUES (1, 'a')").await.unwrap();
    let tables_before = store.table_names().await.unwrap();
    let result = run(&store, "SELECT * FROM t").await.unwrap();
    assert_eq!(result.rows().len(), 1);
    assert_eq!(store.table_names().await.unwrap(), tables_before);
    let count = run(&store, "SELECT COUNT(*) AS n FROM t").await.unwrap();
    assert_eq!(count.rows()[0]["n"], json!(1));
}

#[tokio::test]
async fn test_empty_result_set_is_still_row_returning() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    let result = run(&store, "SELECT * FROM t WHERE id = 42").await.unwrap();
    assert!(result.is_row_returning());
    assert_eq!(result.message, "0 row(s) returned.");
}

#[tokio::test]
async fn test_syntax_error_surfaces_engine_message() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    let err = run(&store, "SELEC * FROM t").await.unwrap_err();
    match err {
        QueryError::Execution(msg) => assert!(msg.contains("syntax error")),
        other => panic!("unexpected error: {other:?}")
    }
}

#[tokio::test]
async fn test_failed_statement_rolls_back() {
    let (_dir, store) = temp_store();
    store
        .replace_schema("CREATE TABLE u (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
        .await
        .unwrap();
    run(&store, "INSERT INTO u VALUES (1, 'a')").await.unwrap();
    // second row violates the NOT NULL constraint after the first succeeds
    let err = run(&store, "INSERT INTO u (id, name) SELECT 2, 'b' UNION ALL SELECT 3, NULL")
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Execution(ref m) if m.contains("NOT NULL")));
    let count = run(&store, "SELECT COUNT(*) AS n FROM u").await.unwrap();
    assert_eq!(count.rows()[0]["n"], json!(1));
}

#[tokio::test]
async fn test_missing_table_is_execution_error() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    let err = run(&store, "SELECT * FROM nope").await.unwrap_err();
    assert!(matches!(err, QueryError::Execution(ref m) if m.contains("no such table")));
}

#[tokio::test]
async fn test_runaway_statement_is_cancelled() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    let live = store.live().await;
    let executor = SqlExecutor::new(Duration::from_millis(100));
    let err = executor
        .execute(
            &live,
            &TranslatedStatement::new(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c"
            )
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Execution(ref m) if m.contains("time limit")));
}

#[test]
fn test_result_serialization_shape() {
    let value = serde_json::to_value(QueryResult::from_affected(3)).unwrap();
    assert_eq!(value["kind"], json!("affected"));
    assert_eq!(value["affected"], json!(3));
    assert_eq!(
        value["message"],
        json!("Query executed successfully. 3 row(s) affected.")
    );
    let value = serde_json::to_value(QueryResult::from_rows(Vec::new())).unwrap();
    assert_eq!(value["kind"], json!("rows"));
    assert_eq!(value["row_count"], json!(0));
}

#[tokio::test]
async fn test_trailing_statement_rejected_before_running() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    for sql in [
        // second statement does not even compile
        "INSERT INTO t VALUES (1, 'a'); DELETE FROM t WHERE rowid IN (SELECT rowid FROM t INDEXED BY nope)",
        "INSERT INTO t VALUES (1, 'a'); INSERT INTO t VALUES (2, 'b')",
        "INSERT INTO t VALUES (1, 'a'); SELEC garbage"
    ] {
        let err = run(&store, sql).await.unwrap_err();
        assert!(matches!(err, QueryError::Translation(ref m) if m.contains("exactly one")), "{sql}: {err:?}");
    }
    let count = run(&store, "SELECT COUNT(*) AS n FROM t").await.unwrap();
    assert_eq!(count.rows()[0]["n"], json!(0));
}

#[tokio::test]
async fn test_trailing_semicolons_and_comments_are_one_statement() {
    let (_dir, store) = temp_store();
    store.replace_schema(SCHEMA_T).await.unwrap();
    run(&store, "INSERT INTO t VALUES (1, 'a');;  ").await.unwrap();
    let result = run(&store, "SELECT COUNT(*) AS n FROM t; -- done\n")
        .await
        .unwrap();
    assert_eq!(result.rows()[0]["n"], json!(1));
}

#[test]
fn test_executor_timeouts() {
    assert_eq!(SqlExecutor::default().timeout(), DEFAULT_STATEMENT_TIMEOUT);
    assert_eq!(
        SqlExecutor::new(Duration::from_millis(250)).timeout(),
        Duration::from_millis(250)
    );
}
