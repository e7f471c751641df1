//! HTTP surface: router assembly and the serve loop.

pub mod api;
pub mod error;
pub mod extract;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Environment;
pub use api::{AppState, SharedState};

/// Where and how to listen.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: Environment::Development,
        }
    }
}

/// Build the full application router: API routes, error rendering for the
/// configured environment, and request tracing.
pub fn build_router(state: SharedState) -> Router {
    let environment = state.environment;
    let mut app = api::api_router()
        .with_state(state)
        .layer(axum::middleware::map_response_with_state(
            environment,
            error::render_errors,
        ))
        .layer(TraceLayer::new_for_http());

    if environment == Environment::Development {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Bind and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, state: SharedState) -> Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, environment = %config.environment, "previewd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthorizationGate;
    use crate::orchestrator::runtime::fake::FakeRuntime;
    use crate::orchestrator::{ContainerOrchestrator, SandboxConfig};
    use crate::resolver::SubdomainResolver;
    use crate::storage::sqlite::SqliteBackend;
    use crate::storage::{StorageBackend, Store};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state(environment: Environment) -> SharedState {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.initialize(true).await.unwrap();
        let store = Store::new(Arc::new(backend));
        Arc::new(AppState {
            gate: AuthorizationGate::new(store.clone(), "test-secret", chrono::Duration::hours(1)),
            resolver: SubdomainResolver::new(store.clone()),
            orchestrator: ContainerOrchestrator::new(
                store.clone(),
                Arc::new(FakeRuntime::new()),
                SandboxConfig::default(),
            ),
            store,
            base_domain: "localhost".to_string(),
            environment,
        })
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn unauthenticated() -> Request<Body> {
        Request::builder()
            .uri("/api/comments")
            .header(header::HOST, "one.localhost")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.environment, Environment::Development);
    }

    #[tokio::test]
    async fn test_build_router_serves_health() {
        let app = build_router(state(Environment::Production).await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_production_errors_use_terse_shape() {
        let app = build_router(state(Environment::Production).await);
        let response = app.oneshot(unauthenticated()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response.into_body()).await;
        assert!(body["errors"]["message"].is_string());
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_development_errors_are_verbose() {
        let app = build_router(state(Environment::Development).await);
        let response = app.oneshot(unauthenticated()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["status"], 401);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = build_router(state(Environment::Production).await);
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
