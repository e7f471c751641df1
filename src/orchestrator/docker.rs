use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::runtime::{ContainerRuntime, LaunchRequest, LaunchedContainer};

/// Seconds Docker waits after SIGTERM before killing a stopping container.
const STOP_GRACE_SECS: i32 = 10;
const LOG_TAIL_LINES: &str = "500";

/// Docker engine runtime over the local socket.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    async fn container_ip(&self, id: &str) -> Result<String> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect container")?;
        info.network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                networks
                    .into_values()
                    .filter_map(|endpoint| endpoint.ip_address)
                    .find(|ip| !ip.is_empty())
            })
            .with_context(|| format!("Container {} has no network address", id))
    }
}

/// 304 (already stopped) and 404 (already gone) count as success.
fn is_benign(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_and_start(&self, request: &LaunchRequest) -> Result<LaunchedContainer> {
        let body = ContainerCreateBody {
            image: Some(request.image.clone()),
            env: Some(request.env.clone()),
            labels: Some(request.labels.clone()),
            host_config: Some(HostConfig {
                memory: Some(request.memory_bytes),
                nano_cpus: Some(request.nano_cpus),
                network_mode: request.network.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptionsBuilder::default()
            .name(&request.name)
            .build();
        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .with_context(|| format!("Failed to create container from {}", request.image))?;
        debug!(id = %created.id, name = %request.name, "container created");

        let started = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .context("Failed to start container");
        if let Err(e) = started {
            if let Err(cleanup) = self.remove(&created.id).await {
                warn!(id = %created.id, error = %cleanup, "failed to clean up unstarted container");
            }
            return Err(e);
        }

        let ip = self.container_ip(&created.id).await?;
        Ok(LaunchedContainer {
            runtime_id: created.id,
            ip,
        })
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let options = StopContainerOptionsBuilder::default()
            .t(STOP_GRACE_SECS)
            .build();
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_benign(&e) => {
                debug!(name, "container already stopped");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to stop container"),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_benign(&e) => {
                debug!(name, "container already removed");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to remove container"),
        }
    }

    async fn logs(&self, name: &str) -> Result<String> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .tail(LOG_TAIL_LINES)
            .build();
        let mut stream = Box::pin(self.docker.logs(name, Some(options)));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read container logs")?;
            out.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_status_codes() {
        let stopped = DockerError::DockerResponseServerError {
            status_code: 304,
            message: "container already stopped".into(),
        };
        let missing = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        };
        let conflict = DockerError::DockerResponseServerError {
            status_code: 409,
            message: "removal in progress".into(),
        };
        assert!(is_benign(&stopped));
        assert!(is_benign(&missing));
        assert!(!is_benign(&conflict));
    }
}
