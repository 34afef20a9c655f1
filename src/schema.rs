//! Active schema and the live SQLite database built from it.
//!
//! The store owns exactly one database file. Uploading a schema drops every
//! user table and view found in the engine's catalog and applies the new DDL,
//! all inside a single transaction: either the new schema is fully in place
//! or the previous one is left untouched.
//!
//! # Example
//!
//! ```
//! use sql_query_assistant::schema::{Schema, split_statements};
//!
//! let sql = "CREATE TABLE a (id INTEGER);\n\nCREATE TABLE b (id INTEGER);\n";
//! assert_eq!(split_statements(sql).len(), 2);
//!
//! let schema = Schema::parse(sql).unwrap();
//! assert_eq!(schema.statements().len(), 2);
//! assert!(Schema::parse("  ;  ").is_none());
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration
};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::error::{AppResult, QueryError, database_open_error};

/// Raw DDL text of the active schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    sql:        String,
    statements: Vec<String>
}

impl Schema {
    /// Parse raw DDL into a schema, or `None` when it holds no statements
    pub fn parse(sql: &str) -> Option<Self> {
        let statements = split_statements(sql);
        if statements.is_empty() {
            return None;
        }
        Some(Self {
            sql: sql.to_string(),
            statements
        })
    }

    /// Schema text exactly as uploaded
    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// Individual statements in upload order
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

/// Split DDL on `;`, dropping blank fragments
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Owner of the active schema and the database file reflecting it.
///
/// Schema replacement takes the write half of the lock; query execution
/// holds the read half through [`LiveDatabase`] for its whole duration.
pub struct SchemaStore {
    path:         PathBuf,
    busy_timeout: Duration,
    active:       RwLock<Option<Schema>>
}

/// Shared, read-locked view of the live database.
///
/// While a `LiveDatabase` exists no schema replacement can start.
pub struct LiveDatabase<'a> {
    store:  &'a SchemaStore,
    schema: RwLockReadGuard<'a, Option<Schema>>
}

impl LiveDatabase<'_> {
    /// Active schema, or [`QueryError::NoSchema`]
    pub fn schema(&self) -> Result<&Schema, QueryError> {
        self.schema.as_ref().ok_or(QueryError::NoSchema)
    }

    /// Open a connection scoped to one execution
    pub fn connect(&self) -> rusqlite::Result<Connection> {
        self.store.connect()
    }
}

impl SchemaStore {
    /// Open (or create) the database file.
    ///
    /// Objects already present in the file become the active schema, so the
    /// catalog and the schema text agree after a restart.
    pub fn open(path: impl Into<PathBuf>, busy_timeout: Duration) -> AppResult<Self> {
        let path = path.into();
        let conn = open_connection(&path, busy_timeout)
            .map_err(|e| database_open_error(&path, e))?;
        let recovered = catalog_ddl(&conn).map_err(|e| database_open_error(&path, e))?;
        let active = Schema::parse(&recovered);
        if let Some(schema) = &active {
            info!(
                path = %path.display(),
                statements = schema.statements().len(),
                "recovered schema from existing database"
            );
        }
        Ok(Self {
            path,
            busy_timeout,
            active: RwLock::new(active)
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the active schema and rebuild the database from it.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Schema`] if any statement fails; the database and
    /// the active schema are then unchanged.
    pub async fn replace_schema(&self, raw_ddl: &str) -> Result<(), QueryError> {
        let mut active = self.active.write().await;
        let statements = split_statements(raw_ddl);
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let to_apply = statements.clone();
        let dropped = tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path, busy_timeout)?;
            rebuild(&mut conn, &to_apply)
        })
        .await
        .map_err(|e| QueryError::Schema(format!("schema task failed: {}", e)))?
        .map_err(|e| QueryError::Schema(e.to_string()))?;
        info!(
            dropped = dropped.len(),
            applied = statements.len(),
            "schema replaced"
        );
        *active = Schema::parse(raw_ddl);
        Ok(())
    }

    /// Currently active schema
    pub async fn current_schema(&self) -> Result<Schema, QueryError> {
        self.active.read().await.clone().ok_or(QueryError::NoSchema)
    }

    /// Whether a schema has been uploaded
    pub async fn has_schema(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Acquire shared access to the live database
    pub async fn live(&self) -> LiveDatabase<'_> {
        LiveDatabase {
            store:  self,
            schema: self.active.read().await
        }
    }

    /// User tables currently present in the database catalog
    pub async fn table_names(&self) -> Result<Vec<String>, QueryError> {
        let _guard = self.active.read().await;
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path, busy_timeout)?;
            catalog_objects(&conn, "table")
        })
        .await
        .map_err(|e| QueryError::Execution(format!("catalog task failed: {}", e)))?
        .map_err(|e| QueryError::Execution(e.to_string()))
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        open_connection(&self.path, self.busy_timeout)
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Drop all user objects and apply `statements`, atomically.
///
/// Returns the names of the dropped objects.
fn rebuild(conn: &mut Connection, statements: &[String]) -> rusqlite::Result<Vec<String>> {
    let tx = conn.transaction()?;
    let mut dropped = Vec::new();
    for (kind, keyword) in [("view", "VIEW"), ("table", "TABLE")] {
        for name in catalog_objects(&tx, kind)? {
            debug!(%name, kind, "dropping");
            tx.execute_batch(&format!("DROP {} IF EXISTS {}", keyword, quote_ident(&name)))?;
            dropped.push(name);
        }
    }
    for statement in statements {
        debug!(%statement, "applying schema statement");
        tx.execute_batch(statement)?;
    }
    tx.commit()?;
    Ok(dropped)
}

fn catalog_objects(conn: &Connection, kind: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY rowid"
    )?;
    let names = stmt.query_map([kind], |row| row.get::<_, String>(0))?;
    names.collect()
}

/// DDL of every user object, in catalog order
fn catalog_ddl(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' ORDER BY rowid"
    )?;
    let ddl = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = String::new();
    for statement in ddl {
        out.push_str(&statement?);
        out.push_str(";\n");
    }
    Ok(out)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
