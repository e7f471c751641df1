//! Storage initialization command: `previewd init`.

use std::path::Path;

use anyhow::{Context, Result};
use previewd::storage::{self, BackendChoice};

/// Create the schema (and optionally the fixture rows) without serving.
pub async fn cmd_init(db_path: &Path, database_url: Option<&str>, seed: bool) -> Result<()> {
    let choice = match database_url {
        Some(url) => BackendChoice::Postgres {
            url: url.to_string(),
            max_connections: 1,
        },
        None => {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
            BackendChoice::Sqlite(db_path.to_path_buf())
        }
    };

    storage::connect(&choice, seed)
        .await
        .context("Failed to initialize storage")?;

    match &choice {
        BackendChoice::Postgres { .. } => println!("Database schema initialized"),
        _ => println!("Database initialized at {}", db_path.display()),
    }
    if seed {
        println!("Fixture data seeded");
    }
    Ok(())
}
