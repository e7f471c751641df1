//! Storage layer.
//!
//! ## Module Map
//!
//! | Module     | Responsibility                                              |
//! |------------|-------------------------------------------------------------|
//! | `mod`      | `StorageBackend` contract, `Param`/`Row`/`Statement` types  |
//! | `sqlite`   | Embedded backend (`rusqlite`, blocking pool)                |
//! | `postgres` | Client-server backend (`sqlx` pool)                         |
//! | `schema`   | DDL per backend and the test fixtures                       |
//! | `store`    | Typed CRUD over the contract, shared by both backends       |
//!
//! Statement templates use `?` placeholders and are bound positionally. A
//! backend is chosen once by [`connect`]; nothing outside the two
//! implementations ever branches on which one is in use.

pub mod postgres;
pub mod schema;
pub mod sqlite;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub use store::Store;

/// One positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<&String> for Param {
    fn from(v: &String) -> Self {
        Param::Text(v.clone())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Param::Null)
    }
}

/// Build a `Vec<Param>` from heterogeneous values.
#[macro_export]
macro_rules! params {
    () => { Vec::<$crate::storage::Param>::new() };
    ($($v:expr),+ $(,)?) => { vec![$($crate::storage::Param::from($v)),+] };
}

/// A result row: column name → value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A template plus its bound parameters, for batched writes.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Raised (inside `anyhow::Error`) when a write violates a unique constraint.
#[derive(Debug, thiserror::Error)]
#[error("unique constraint violated: {0}")]
pub struct UniqueViolation(pub String);

/// True if `err` (or anything in its chain) is a [`UniqueViolation`].
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<UniqueViolation>())
}

/// Uniform contract over the embedded and client-server databases.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Run a read and return every row.
    async fn query(&self, sql: &str, params: Vec<Param>) -> Result<Vec<Row>>;

    /// Run a write and return the number of affected rows.
    async fn run(&self, sql: &str, params: Vec<Param>) -> Result<u64>;

    /// Run every statement in one transaction; nothing is applied on failure.
    async fn run_batch(&self, statements: Vec<Statement>) -> Result<u64>;

    /// Create the schema if absent and, when asked, insert fixtures once.
    async fn initialize(&self, seed_test_data: bool) -> Result<()>;
}

/// Which backend to open. Exactly one is selected per process.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendChoice {
    Sqlite(PathBuf),
    SqliteInMemory,
    Postgres { url: String, max_connections: u32 },
}

/// Open the selected backend and initialize it.
pub async fn connect(choice: &BackendChoice, seed_test_data: bool) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match choice {
        BackendChoice::Sqlite(path) => {
            info!(path = %path.display(), "using embedded sqlite storage");
            Arc::new(sqlite::SqliteBackend::open(path)?)
        }
        BackendChoice::SqliteInMemory => {
            info!("using in-memory sqlite storage");
            Arc::new(sqlite::SqliteBackend::open_in_memory()?)
        }
        BackendChoice::Postgres {
            url,
            max_connections,
        } => {
            info!("using postgres storage");
            Arc::new(postgres::PostgresBackend::connect(url, *max_connections).await?)
        }
    };
    backend.initialize(seed_test_data).await?;
    Ok(backend)
}

/// Split flat joined rows into runs sharing the same leading id column,
/// preserving row order. Rows without the key are skipped.
pub fn group_rows(rows: Vec<Row>, key: &str) -> Vec<Vec<Row>> {
    let mut groups: Vec<Vec<Row>> = Vec::new();
    for row in rows {
        let Some(id) = row.get(key).cloned() else {
            continue;
        };
        match groups.last_mut() {
            Some(group) if group[0].get(key) == Some(&id) => group.push(row),
            _ => groups.push(vec![row]),
        }
    }
    groups
}
