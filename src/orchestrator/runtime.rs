use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// Everything the runtime needs to start one preview container.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Runtime-side container name; also the handle for stop/remove/logs.
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub port: u16,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchedContainer {
    pub runtime_id: String,
    pub ip: String,
}

/// Container engine used by the orchestrator.
///
/// `stop` and `remove` must succeed when the container is already stopped or
/// already gone.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_and_start(&self, request: &LaunchRequest) -> Result<LaunchedContainer>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn remove(&self, name: &str) -> Result<()>;
    /// Combined stdout/stderr snapshot.
    async fn logs(&self, name: &str) -> Result<String>;
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use super::{ContainerRuntime, LaunchRequest, LaunchedContainer};

    #[derive(Debug, Clone, PartialEq)]
    pub struct FakeContainer {
        pub request_env: Vec<String>,
        pub image: String,
        pub running: bool,
    }

    /// In-memory runtime recording every call.
    #[derive(Default)]
    pub struct FakeRuntime {
        pub containers: Mutex<HashMap<String, FakeContainer>>,
        pub calls: Mutex<Vec<String>>,
        pub fail_create: AtomicBool,
        pub fail_remove: AtomicBool,
        pub create_delay: Mutex<Option<Duration>>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn container(&self, name: &str) -> Option<FakeContainer> {
            self.containers.lock().unwrap().get(name).cloned()
        }

        pub fn set_fail_create(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_remove(&self, fail: bool) {
            self.fail_remove.store(fail, Ordering::SeqCst);
        }

        pub fn set_create_delay(&self, delay: Duration) {
            *self.create_delay.lock().unwrap() = Some(delay);
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn create_and_start(&self, request: &LaunchRequest) -> Result<LaunchedContainer> {
            self.record(format!("create {}", request.name));
            let delay = *self.create_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_create.load(Ordering::SeqCst) {
                bail!("image {} not found", request.image);
            }
            let mut containers = self.containers.lock().unwrap();
            let ip = format!("172.17.0.{}", containers.len() + 2);
            containers.insert(
                request.name.clone(),
                FakeContainer {
                    request_env: request.env.clone(),
                    image: request.image.clone(),
                    running: true,
                },
            );
            Ok(LaunchedContainer {
                runtime_id: format!("rt-{}", request.name),
                ip,
            })
        }

        async fn stop(&self, name: &str) -> Result<()> {
            self.record(format!("stop {}", name));
            if let Some(container) = self.containers.lock().unwrap().get_mut(name) {
                container.running = false;
            }
            Ok(())
        }

        async fn remove(&self, name: &str) -> Result<()> {
            self.record(format!("remove {}", name));
            if self.fail_remove.load(Ordering::SeqCst) {
                bail!("daemon unavailable");
            }
            self.containers.lock().unwrap().remove(name);
            Ok(())
        }

        async fn logs(&self, name: &str) -> Result<String> {
            self.record(format!("logs {}", name));
            match self.containers.lock().unwrap().get(name) {
                Some(_) => Ok(format!("listening ({})\n", name)),
                None => bail!("no such container {}", name),
            }
        }
    }
}
