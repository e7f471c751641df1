use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql, params_from_iter};
use serde_json::Value;

use super::schema::{SQLITE_SCHEMA, seed_fixtures};
use super::{Param, Row, Statement, StorageBackend, UniqueViolation};

impl ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Param::Null => ToSqlOutput::Owned(SqlValue::Null),
            Param::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Param::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Embedded SQLite backend.
///
/// Wraps a single connection behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct SqliteBackend {
    inner: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database (tests, `--memory`).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Run a closure with the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

/// Tag unique-constraint failures so callers can tell them apart.
fn map_write_error(err: rusqlite::Error) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(code, ref message) = err
        && code.code == ErrorCode::ConstraintViolation
        && matches!(
            code.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    {
        let detail = message.clone().unwrap_or_else(|| "unique constraint".to_string());
        return anyhow::Error::new(UniqueViolation(detail));
    }
    anyhow::Error::new(err)
}

fn query_rows(conn: &Connection, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql).context("Failed to prepare query")?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .context("Failed to run query")?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().context("Failed to read row")? {
        let mut map = Row::new();
        for (idx, name) in names.iter().enumerate() {
            map.insert(name.clone(), value_from_ref(row.get_ref(idx)?));
        }
        out.push(map);
    }
    Ok(out)
}

fn execute(conn: &Connection, sql: &str, params: &[Param]) -> Result<u64> {
    let count = conn
        .execute(sql, params_from_iter(params.iter()))
        .map_err(map_write_error)?;
    Ok(count as u64)
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn query(&self, sql: &str, params: Vec<Param>) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.call(move |conn| query_rows(conn, &sql, &params)).await
    }

    async fn run(&self, sql: &str, params: Vec<Param>) -> Result<u64> {
        let sql = sql.to_string();
        self.call(move |conn| execute(conn, &sql, &params)).await
    }

    async fn run_batch(&self, statements: Vec<Statement>) -> Result<u64> {
        self.call(move |conn| {
            // Safety: the mutex already guarantees single-threaded access.
            let tx = conn
                .unchecked_transaction()
                .context("Failed to begin transaction")?;
            let mut total = 0;
            for statement in &statements {
                total += execute(&tx, &statement.sql, &statement.params)?;
            }
            tx.commit().context("Failed to commit batch")?;
            Ok(total)
        })
        .await
    }

    async fn initialize(&self, seed_test_data: bool) -> Result<()> {
        self.call(|conn| {
            for ddl in SQLITE_SCHEMA {
                conn.execute(ddl, []).context("Failed to create schema")?;
            }
            Ok(())
        })
        .await?;
        if seed_test_data {
            seed_fixtures(self).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use crate::storage::is_unique_violation;
    use crate::storage::schema::FIXTURE_OWNER_ID;

    async fn backend() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.initialize(false).await.unwrap();
        backend
    }

    async fn count(backend: &SqliteBackend, table: &str) -> i64 {
        let rows = backend
            .query(&format!("SELECT COUNT(*) AS n FROM {}", table), params![])
            .await
            .unwrap();
        rows[0]["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_tables() {
        let backend = backend().await;
        let rows = backend
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                params![],
            )
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        for table in [
            "answers",
            "comments",
            "containers",
            "questions",
            "reactions",
            "threads",
            "users",
        ] {
            assert!(names.contains(&table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_and_seeds_once() {
        let backend = backend().await;
        backend.initialize(true).await.unwrap();
        backend.initialize(true).await.unwrap();
        backend.initialize(false).await.unwrap();

        assert_eq!(count(&backend, "users").await, 2);
        assert_eq!(count(&backend, "containers").await, 1);
        let owner = backend
            .query("SELECT name FROM users WHERE id = ?", params![FIXTURE_OWNER_ID])
            .await
            .unwrap();
        assert_eq!(owner[0]["name"], "jaba");
    }

    #[tokio::test]
    async fn test_query_binds_positionally() {
        let backend = backend().await;
        backend
            .run(
                "INSERT INTO users (id, name, secret) VALUES (?, ?, ?)",
                params!["u1", None::<String>, "s1"],
            )
            .await
            .unwrap();
        let rows = backend
            .query("SELECT secret, id, name FROM users WHERE id = ?", params!["u1"])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["secret"], "s1");
        assert_eq!(rows[0]["id"], "u1");
        assert_eq!(rows[0]["name"], Value::Null);

        let injected = backend
            .query("SELECT id FROM users WHERE id = ?", params!["u1' OR '1'='1"])
            .await
            .unwrap();
        assert!(injected.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_affected_rows() {
        let backend = backend().await;
        for id in ["u1", "u2"] {
            backend
                .run(
                    "INSERT INTO users (id, secret) VALUES (?, ?)",
                    params![id, "s"],
                )
                .await
                .unwrap();
        }
        let updated = backend
            .run("UPDATE users SET name = ?", params!["x"])
            .await
            .unwrap();
        assert_eq!(updated, 2);
        let deleted = backend
            .run("DELETE FROM users WHERE id = ?", params!["nope"])
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_unique_violation_is_tagged() {
        let backend = backend().await;
        let insert = "INSERT INTO users (id, secret) VALUES (?, ?)";
        backend.run(insert, params!["u1", "s"]).await.unwrap();
        let err = backend.run(insert, params!["u1", "s"]).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_run_batch_rolls_back_on_failure() {
        let backend = backend().await;
        let err = backend
            .run_batch(vec![
                Statement::new(
                    "INSERT INTO users (id, secret) VALUES (?, ?)",
                    params!["u1", "s"],
                ),
                Statement::new(
                    "INSERT INTO users (id, secret) VALUES (?, ?)",
                    params!["u1", "s"],
                ),
            ])
            .await;
        assert!(err.is_err());
        assert_eq!(count(&backend, "users").await, 0);
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let backend = backend().await;
        let err = backend
            .run(
                "INSERT INTO containers (id, subdomain, url, user_id) VALUES (?, ?, ?, ?)",
                params!["c1", "demo", "http://x", "ghost"],
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("previewd.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.initialize(true).await.unwrap();
        }
        let reopened = SqliteBackend::open(&path).unwrap();
        reopened.initialize(true).await.unwrap();
        assert_eq!(count(&reopened, "users").await, 2);
    }
}
