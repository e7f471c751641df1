//! Container lifecycle.
//!
//! The orchestrator is the only component that starts, stops or removes
//! runtime containers and the only one that writes container rows. A row is
//! written only once the runtime reports a running container, so a routable
//! subdomain always points at something that was started.

pub mod docker;
pub mod runtime;
pub mod sandbox;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use previewd_common::validate::{new_id, validate_instance_name, validate_port};
use previewd_common::{
    ContainerRecord, ContainerRoute, ContainerState, ContainerSummary, InstanceSpec,
    PreviewError, PreviewResult,
};
use serde_json::json;
use tracing::{info, warn};

use crate::storage::schema::password_digest;
use crate::storage::store::NewContainer;
use crate::storage::{Store, is_unique_violation};

pub use docker::DockerRuntime;
pub use runtime::{ContainerRuntime, LaunchRequest, LaunchedContainer};
pub use sandbox::SandboxConfig;

/// Runtime-side name of the container backing row `id`.
pub fn runtime_name(id: &str) -> String {
    format!("previewd-{}", id)
}

#[derive(Clone)]
pub struct ContainerOrchestrator {
    store: Store,
    runtime: Arc<dyn ContainerRuntime>,
    sandbox: Arc<SandboxConfig>,
    timeout: Duration,
}

impl ContainerOrchestrator {
    pub fn new(store: Store, runtime: Arc<dyn ContainerRuntime>, sandbox: SandboxConfig) -> Self {
        let timeout = Duration::from_secs(sandbox.timeout.max(1));
        Self {
            store,
            runtime,
            sandbox: Arc::new(sandbox),
            timeout,
        }
    }

    /// Override the per-call runtime timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `op` on its own task so a dropped request cannot abandon it halfway.
    async fn detached<T, F, Fut>(&self, op: F) -> PreviewResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = PreviewResult<T>> + Send + 'static,
    {
        tokio::spawn(op(self.clone()))
            .await
            .map_err(|e| PreviewError::Internal(anyhow::anyhow!("Lifecycle task failed: {}", e)))?
    }

    /// Bound a runtime call by the configured timeout. Failure and expiry both
    /// surface as `ProvisioningFailed`.
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> PreviewResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PreviewError::ProvisioningFailed(format!("{}: {:#}", what, e))),
            Err(_) => Err(PreviewError::ProvisioningFailed(format!(
                "{}: timed out after {}s",
                what,
                self.timeout.as_secs_f64()
            ))),
        }
    }

    async fn discard(&self, name: &str) {
        if let Err(e) = self.bounded("remove", self.runtime.remove(name)).await {
            warn!(name, error = %e, "best-effort container removal failed");
        }
    }

    fn launch_request(
        &self,
        id: &str,
        spec: &InstanceSpec,
        image: &str,
        port: u16,
    ) -> PreviewResult<LaunchRequest> {
        let memory_bytes = self
            .sandbox
            .memory_bytes()
            .map_err(PreviewError::Internal)?;
        let mut env: Vec<String> = vec![
            format!("SOURCE_URL={}", spec.source_url),
            format!("SOURCE_REF={}", spec.git_ref),
            format!("PORT={}", port),
            format!("INSTANCE_NAME={}", spec.name),
        ];
        let mut extra: Vec<_> = self.sandbox.env.iter().collect();
        extra.sort();
        env.extend(extra.into_iter().map(|(k, v)| format!("{}={}", k, v)));

        let labels = HashMap::from([
            ("previewd.id".to_string(), id.to_string()),
            ("previewd.subdomain".to_string(), spec.name.to_lowercase()),
        ]);
        Ok(LaunchRequest {
            name: runtime_name(id),
            image: image.to_string(),
            env,
            port,
            memory_bytes,
            nano_cpus: self.sandbox.nano_cpus(),
            network: self.sandbox.network.clone(),
            labels,
        })
    }

    /// Provision a new instance owned by `owner_user_id`.
    pub async fn create_instance(
        &self,
        owner_user_id: &str,
        spec: InstanceSpec,
    ) -> PreviewResult<ContainerRecord> {
        let owner = owner_user_id.to_string();
        self.detached(move |this| async move { this.provision(&owner, spec).await })
            .await
    }

    async fn provision(
        &self,
        owner_user_id: &str,
        spec: InstanceSpec,
    ) -> PreviewResult<ContainerRecord> {
        validate_instance_name(&spec.name)?;
        let port = validate_port(spec.port)?;
        if spec.source_url.trim().is_empty() {
            return Err(PreviewError::bad_request("sourceUrl is required"));
        }
        if spec.git_ref.trim().is_empty() {
            return Err(PreviewError::bad_request("ref is required"));
        }
        let image = self
            .sandbox
            .image_for(&spec.kind)
            .ok_or_else(|| {
                PreviewError::bad_request(format!("Unknown instance type '{}'", spec.kind))
            })?
            .to_string();

        let subdomain = spec.name.to_lowercase();
        if self.store.find_by_subdomain(&subdomain).await?.is_some() {
            return Err(PreviewError::Conflict(format!(
                "Subdomain '{}' is already in use",
                subdomain
            )));
        }

        let id = new_id();
        let request = self.launch_request(&id, &spec, &image, port)?;
        info!(%id, %subdomain, %image, "provisioning instance");

        let launched = match self
            .bounded("create", self.runtime.create_and_start(&request))
            .await
        {
            Ok(launched) => launched,
            Err(e) => {
                // A timed-out create may still have produced a container.
                self.discard(&request.name).await;
                warn!(%id, %subdomain, error = %e, "provisioning failed");
                return Err(e);
            }
        };

        let new = NewContainer {
            id: id.clone(),
            subdomain: subdomain.clone(),
            url: format!("http://{}:{}", launched.ip, port),
            owner_user_id: owner_user_id.to_string(),
            password_hash: spec
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(password_digest),
            blob: json!({
                "name": spec.name,
                "type": spec.kind,
                "sourceUrl": spec.source_url,
                "ref": spec.git_ref,
                "port": port,
                "runtimeId": launched.runtime_id,
            }),
        };
        match self.store.insert_container(&new).await {
            Ok(record) => {
                info!(%id, %subdomain, url = %record.url, "instance running");
                Ok(record)
            }
            Err(e) => {
                self.discard(&request.name).await;
                if is_unique_violation(&e) {
                    Err(PreviewError::Conflict(format!(
                        "Subdomain '{}' is already in use",
                        subdomain
                    )))
                } else {
                    Err(PreviewError::Internal(e))
                }
            }
        }
    }

    pub async fn get(&self, id: &str) -> PreviewResult<ContainerRecord> {
        self.store
            .get_container(id)
            .await?
            .ok_or_else(|| PreviewError::not_found("container", id))
    }

    /// Ownership view of a container, for authorization checks.
    pub async fn route(&self, id: &str) -> PreviewResult<ContainerRoute> {
        let record = self.get(id).await?;
        Ok(ContainerRoute {
            container_id: record.id,
            owner_user_id: record.owner_user_id,
        })
    }

    /// Stop the runtime container and keep the row as `stopped`.
    pub async fn stop_instance(&self, id: &str) -> PreviewResult<ContainerRecord> {
        let id = id.to_string();
        self.detached(move |this| async move {
            let record = this.get(&id).await?;
            this.bounded("stop", this.runtime.stop(&runtime_name(&id)))
                .await?;
            if record.state != ContainerState::Stopped {
                this.store
                    .set_container_state(&id, ContainerState::Stopped)
                    .await?;
                info!(%id, "instance stopped");
            }
            this.get(&id).await
        })
        .await
    }

    /// Tear down an instance. Runtime removal is best-effort; the row is
    /// removed regardless. Returns whether a row existed.
    pub async fn delete_instance(&self, id: &str) -> PreviewResult<bool> {
        let id = id.to_string();
        self.detached(move |this| async move {
            if this.store.get_container(&id).await?.is_none() {
                return Ok(false);
            }
            this.discard(&runtime_name(&id)).await;
            let removed = this.store.remove_container(&id).await?;
            info!(%id, "instance removed");
            Ok(removed > 0)
        })
        .await
    }

    /// Every persisted container, for reconciliation.
    pub async fn list_running(&self) -> PreviewResult<Vec<ContainerSummary>> {
        Ok(self.store.list_containers().await?)
    }

    pub async fn list_for_owner(&self, user_id: &str) -> PreviewResult<Vec<ContainerRecord>> {
        Ok(self.store.list_containers_by_user(user_id).await?)
    }

    /// Log snapshot of the instance named `name`.
    pub async fn logs(&self, name: &str) -> PreviewResult<String> {
        let subdomain = name.to_lowercase();
        let route = self
            .store
            .find_by_subdomain(&subdomain)
            .await?
            .ok_or_else(|| PreviewError::not_found("instance", subdomain))?;
        self.bounded("logs", self.runtime.logs(&runtime_name(&route.container_id)))
            .await
    }
}
