use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo, ValueRef};

use super::schema::{POSTGRES_SCHEMA, seed_fixtures};
use super::{Param, Row, Statement, StorageBackend, UniqueViolation};

/// Client-server backend over an `sqlx` connection pool.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self { pool })
    }
}

/// Rewrite `?` placeholders as `$1, $2, ...`, leaving quoted literals alone.
pub fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut in_literal = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '?' if !in_literal => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Param],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Param::Null => query.bind(None::<String>),
            Param::Int(v) => query.bind(*v),
            Param::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut map = Row::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match column.type_info().name() {
                "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
                "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
                "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
                "BOOL" => Value::from(row.try_get::<bool, _>(idx)?),
                "FLOAT8" => Value::from(row.try_get::<f64, _>(idx)?),
                "FLOAT4" => Value::from(row.try_get::<f32, _>(idx)?),
                other => Value::String(
                    row.try_get::<String, _>(idx)
                        .with_context(|| format!("Unsupported column type {}", other))?,
                ),
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

/// Tag unique-constraint failures so callers can tell them apart.
fn map_write_error(err: sqlx::Error) -> anyhow::Error {
    if let sqlx::Error::Database(ref db) = err
        && db.is_unique_violation()
    {
        return anyhow::Error::new(UniqueViolation(db.message().to_string()));
    }
    anyhow::Error::new(err)
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn query(&self, sql: &str, params: Vec<Param>) -> Result<Vec<Row>> {
        let sql = number_placeholders(sql);
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .context("Failed to run query")?;
        rows.iter().map(decode_row).collect()
    }

    async fn run(&self, sql: &str, params: Vec<Param>) -> Result<u64> {
        let sql = number_placeholders(sql);
        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn run_batch(&self, statements: Vec<Statement>) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        let mut total = 0;
        for statement in &statements {
            let sql = number_placeholders(&statement.sql);
            let result = bind_params(sqlx::query(&sql), &statement.params)
                .execute(&mut *tx)
                .await
                .map_err(map_write_error)?;
            total += result.rows_affected();
        }
        // Dropping `tx` on the error paths above rolls back.
        tx.commit().await.context("Failed to commit batch")?;
        Ok(total)
    }

    async fn initialize(&self, seed_test_data: bool) -> Result<()> {
        for ddl in POSTGRES_SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }
        if seed_test_data {
            seed_fixtures(self).await?;
        }
        Ok(())
    }
}
