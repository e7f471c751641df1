//! Layered configuration for previewd.
//!
//! Values are resolved in order: built-in defaults, then `previewd.toml`, then
//! environment variables (a `.env` file is loaded first when present), then
//! command-line flags, which the `serve` command applies last.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! base_domain = "preview.example.com"
//! environment = "production"
//! log_json = true
//! log_dir = "/var/log/previewd"
//!
//! [database]
//! path = "/var/lib/previewd/previewd.db"
//! # url = "postgres://previewd@db/previewd"
//! max_connections = 10
//!
//! [sandbox]
//! memory = "2g"
//! cpus = 2.0
//! timeout = 600
//! network = "previews"
//!
//! [sandbox.images]
//! node = "registry.example.com/builder-node:20"
//!
//! [auth]
//! token_secret = "change-me"
//! token_ttl_hours = 12
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::orchestrator::sandbox::{SandboxConfig, SandboxSection};
use crate::storage::BackendChoice;

pub const CONFIG_FILE: &str = "previewd.toml";
pub const DEV_TOKEN_SECRET: &str = "dev-secret-change-me";

/// Deployment environment. Controls error verbosity and CORS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!(
                "Invalid environment '{}'. Valid values: development, production",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub base_domain: String,
    pub environment: Environment,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_domain: "localhost".to_string(),
            environment: Environment::Development,
            log_json: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    /// SQLite file used when no URL is configured.
    pub path: PathBuf,
    /// PostgreSQL URL; when set, the client-server backend is used.
    pub url: Option<String>,
    pub max_connections: u32,
    pub in_memory: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("previewd.db"),
            url: None,
            max_connections: 5,
            in_memory: false,
        }
    }
}

impl DatabaseSettings {
    /// A URL always wins over the file settings.
    pub fn backend_choice(&self) -> BackendChoice {
        match &self.url {
            Some(url) => BackendChoice::Postgres {
                url: url.clone(),
                max_connections: self.max_connections,
            },
            None if self.in_memory => BackendChoice::SqliteInMemory,
            None => BackendChoice::Sqlite(self.path.clone()),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct AuthSettings {
    pub token_secret: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_secret: DEV_TOKEN_SECRET.to_string(),
            token_ttl_hours: 24,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("token_secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .finish()
    }
}

impl AuthSettings {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours.max(1))
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewdConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub sandbox: SandboxConfig,
    pub auth: AuthSettings,
}

// Raw TOML tables. Every key is optional and overlays the defaults.

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PreviewdToml {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    sandbox: SandboxSection,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    base_domain: Option<String>,
    environment: Option<Environment>,
    log_json: Option<bool>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    path: Option<PathBuf>,
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthSection {
    token_secret: Option<String>,
    token_ttl_hours: Option<i64>,
}

impl PreviewdConfig {
    /// Parse a configuration document and overlay it on the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: PreviewdToml = toml::from_str(content).context("Failed to parse previewd.toml")?;
        let mut config = Self::default();

        let server = raw.server;
        if let Some(host) = server.host {
            config.server.host = host;
        }
        if let Some(port) = server.port {
            config.server.port = port;
        }
        if let Some(base_domain) = server.base_domain {
            config.server.base_domain = base_domain;
        }
        if let Some(environment) = server.environment {
            config.server.environment = environment;
        }
        if let Some(log_json) = server.log_json {
            config.server.log_json = log_json;
        }
        if server.log_dir.is_some() {
            config.server.log_dir = server.log_dir;
        }

        let database = raw.database;
        if let Some(path) = database.path {
            config.database.path = path;
        }
        if database.url.is_some() {
            config.database.url = database.url;
        }
        if let Some(max) = database.max_connections {
            config.database.max_connections = max;
        }

        config.sandbox.apply(raw.sandbox);

        if let Some(secret) = raw.auth.token_secret {
            config.auth.token_secret = secret;
        }
        if let Some(ttl) = raw.auth.token_ttl_hours {
            config.auth.token_ttl_hours = ttl;
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `path` if given (it must exist), otherwise `./previewd.toml` when
    /// present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(env) = lookup("PREVIEWD_ENV").filter(|v| !v.is_empty()) {
            self.server.environment = env.parse()?;
        }
        if let Some(domain) = lookup("PREVIEWD_BASE_DOMAIN").filter(|v| !v.is_empty()) {
            self.server.base_domain = domain;
        }
        if let Some(secret) = lookup("PREVIEWD_TOKEN_SECRET").filter(|v| !v.is_empty()) {
            self.auth.token_secret = secret;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.environment == Environment::Production
            && self.auth.token_secret == DEV_TOKEN_SECRET
        {
            warnings.push(
                "auth.token_secret is the development default; set PREVIEWD_TOKEN_SECRET"
                    .to_string(),
            );
        }
        if let Err(e) = self.sandbox.memory_bytes() {
            warnings.push(format!("sandbox.memory: {}", e));
        }
        if self.sandbox.cpus <= 0.0 {
            warnings.push(format!("sandbox.cpus must be positive, got {}", self.sandbox.cpus));
        }
        if self.database.url.is_some() && self.database.in_memory {
            warnings.push("database.url is set; in-memory SQLite is ignored".to_string());
        }
        warnings
    }
}
