//! HTTP server command: `previewd serve`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use previewd::auth::AuthorizationGate;
use previewd::config::{Environment, PreviewdConfig};
use previewd::orchestrator::{ContainerOrchestrator, DockerRuntime};
use previewd::resolver::SubdomainResolver;
use previewd::server::{AppState, ServerConfig, start_server};
use previewd::storage::{self, Store};
use tracing::{info, warn};

use super::super::ServeArgs;

/// Flags win over the file and the environment.
fn apply_flags(config: &mut PreviewdConfig, args: &ServeArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(domain) = &args.base_domain {
        config.server.base_domain = domain.clone();
    }
    if args.dev {
        config.server.environment = Environment::Development;
    }
    if args.log_json {
        config.server.log_json = true;
    }
    if let Some(path) = &args.db_path {
        config.database.path = path.clone();
    }
    if let Some(url) = &args.database_url {
        config.database.url = Some(url.clone());
    }
    if args.memory {
        config.database.in_memory = true;
    }
}

pub async fn cmd_serve(config_path: Option<&Path>, args: &ServeArgs) -> Result<()> {
    let mut config = PreviewdConfig::load_or_default(config_path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    apply_flags(&mut config, args);

    let _guard = previewd::logging::init(config.server.log_json, config.server.log_dir.as_deref())?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let choice = config.database.backend_choice();
    if let storage::BackendChoice::Sqlite(path) = &choice {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    let backend = storage::connect(&choice, args.seed)
        .await
        .context("Failed to initialize storage")?;
    let store = Store::new(backend);

    let runtime = Arc::new(DockerRuntime::connect()?);
    let orchestrator = ContainerOrchestrator::new(store.clone(), runtime, config.sandbox.clone());

    let state = Arc::new(AppState {
        gate: AuthorizationGate::new(
            store.clone(),
            config.auth.token_secret.clone(),
            config.auth.token_ttl(),
        ),
        resolver: SubdomainResolver::new(store.clone()),
        orchestrator,
        store,
        base_domain: config.server.base_domain.clone(),
        environment: config.server.environment,
    });

    info!(base_domain = %config.server.base_domain, "starting previewd");
    start_server(
        ServerConfig {
            host: config.server.host.clone(),
            port: config.server.port,
            environment: config.server.environment,
        },
        state,
    )
    .await
}
