//! Schema definitions and test fixtures.
//!
//! Both dialects store timestamps as UTC text (`YYYY-MM-DD HH:MM:SS`) and JSON
//! blobs as text so rows read back identically from either backend.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{Param, Statement, StorageBackend};

pub const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT,
        secret TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS containers (
        id TEXT PRIMARY KEY,
        subdomain TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        state TEXT NOT NULL DEFAULT 'running',
        password_hash TEXT,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS threads (
        id TEXT PRIMARY KEY,
        container_id TEXT NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS reactions (
        id TEXT PRIMARY KEY,
        emoji TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        comment_id TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS questions (
        id TEXT PRIMARY KEY,
        container_id TEXT NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
        user_id TEXT REFERENCES users(id),
        order_id INTEGER NOT NULL DEFAULT 0,
        type TEXT NOT NULL,
        text TEXT NOT NULL,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS answers (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id),
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_answers_user_question ON answers(user_id, question_id)",
    "CREATE INDEX IF NOT EXISTS idx_containers_user ON containers(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_threads_container ON threads(container_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_thread ON comments(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_reactions_comment ON reactions(comment_id)",
    "CREATE INDEX IF NOT EXISTS idx_questions_container ON questions(container_id, order_id)",
];

pub const POSTGRES_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT,
        secret TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE TABLE IF NOT EXISTS containers (
        id TEXT PRIMARY KEY,
        subdomain TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        state TEXT NOT NULL DEFAULT 'running',
        password_hash TEXT,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE TABLE IF NOT EXISTS threads (
        id TEXT PRIMARY KEY,
        container_id TEXT NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE TABLE IF NOT EXISTS reactions (
        id TEXT PRIMARY KEY,
        emoji TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id),
        comment_id TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE TABLE IF NOT EXISTS questions (
        id TEXT PRIMARY KEY,
        container_id TEXT NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
        user_id TEXT REFERENCES users(id),
        order_id BIGINT NOT NULL DEFAULT 0,
        type TEXT NOT NULL,
        text TEXT NOT NULL,
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE TABLE IF NOT EXISTS answers (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id),
        blob TEXT,
        created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS')
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_answers_user_question ON answers(user_id, question_id)",
    "CREATE INDEX IF NOT EXISTS idx_containers_user ON containers(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_threads_container ON threads(container_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_thread ON comments(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_reactions_comment ON reactions(comment_id)",
    "CREATE INDEX IF NOT EXISTS idx_questions_container ON questions(container_id, order_id)",
];

/// Fixture identities, exposed so tests and local demos can act as them.
pub const FIXTURE_OWNER_ID: &str = "da776df3";
pub const FIXTURE_OWNER_SECRET: &str = "ea2ca2565f484906bfd5096126816a";
pub const FIXTURE_GUEST_ID: &str = "b1a2c3d4";
pub const FIXTURE_GUEST_SECRET: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1";
pub const FIXTURE_CONTAINER_ID: &str = "c0ffee01";
pub const FIXTURE_SUBDOMAIN: &str = "one";
pub const FIXTURE_PASSWORD: &str = "correct";

/// Hex SHA-256 digest used for instance passwords.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn fixture_statements() -> Vec<Statement> {
    let text = |s: &str| Param::Text(s.to_string());
    vec![
        Statement::new(
            "INSERT INTO users (id, name, secret) VALUES (?, ?, ?)",
            vec![text(FIXTURE_OWNER_ID), text("jaba"), text(FIXTURE_OWNER_SECRET)],
        ),
        Statement::new(
            "INSERT INTO users (id, name, secret) VALUES (?, ?, ?)",
            vec![text(FIXTURE_GUEST_ID), Param::Null, text(FIXTURE_GUEST_SECRET)],
        ),
        Statement::new(
            "INSERT INTO containers (id, subdomain, url, user_id, state, password_hash, blob) VALUES (?, ?, ?, ?, ?, ?, ?)",
            vec![
                text(FIXTURE_CONTAINER_ID),
                text(FIXTURE_SUBDOMAIN),
                text("http://127.0.0.1:3000"),
                text(FIXTURE_OWNER_ID),
                text("running"),
                text(&password_digest(FIXTURE_PASSWORD)),
                text("{}"),
            ],
        ),
        Statement::new(
            "INSERT INTO threads (id, container_id, blob) VALUES (?, ?, ?)",
            vec![text("3b1a3ad0"), text(FIXTURE_CONTAINER_ID), text("{}")],
        ),
        Statement::new(
            "INSERT INTO comments (id, text, user_id, thread_id, blob) VALUES (?, ?, ?, ?, ?)",
            vec![
                text("1bd8052b"),
                text("Looks good on mobile"),
                text(FIXTURE_OWNER_ID),
                text("3b1a3ad0"),
                text(r#"{"path":"/"}"#),
            ],
        ),
        Statement::new(
            "INSERT INTO reactions (id, emoji, user_id, comment_id) VALUES (?, ?, ?, ?)",
            vec![text("1ddb07c8"), text("👍"), text(FIXTURE_GUEST_ID), text("1bd8052b")],
        ),
        Statement::new(
            "INSERT INTO questions (id, container_id, user_id, order_id, type, text, blob) VALUES (?, ?, ?, ?, ?, ?, ?)",
            vec![
                text("9a8b7c6d"),
                text(FIXTURE_CONTAINER_ID),
                text(FIXTURE_OWNER_ID),
                Param::Int(0),
                text("text"),
                text("How does the new layout feel?"),
                text("{}"),
            ],
        ),
    ]
}

/// Insert the fixtures unless a previous call already did.
pub async fn seed_fixtures(backend: &dyn StorageBackend) -> Result<()> {
    let rows = backend
        .query(
            "SELECT COUNT(*) AS n FROM users WHERE id = ?",
            vec![Param::Text(FIXTURE_OWNER_ID.to_string())],
        )
        .await
        .context("Failed to check for fixture data")?;
    let seeded = rows
        .first()
        .and_then(|r| r.get("n"))
        .and_then(|n| n.as_i64())
        .unwrap_or(0)
        > 0;
    if seeded {
        debug!("fixture data already present");
        return Ok(());
    }
    backend
        .run_batch(fixture_statements())
        .await
        .context("Failed to insert fixture data")?;
    info!("inserted fixture data");
    Ok(())
}
