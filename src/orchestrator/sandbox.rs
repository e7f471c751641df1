use std::collections::HashMap;

use anyhow::{Result, bail};
use serde::Deserialize;

/// Resource limits and builder images for preview containers.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Instance type → builder image.
    pub images: HashMap<String, String>,
    pub memory: String,
    pub cpus: f64,
    /// Seconds allowed for any single runtime call.
    pub timeout: u64,
    pub network: Option<String>,
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let images = [
            ("node", "previewd/builder-node:latest"),
            ("static", "previewd/builder-static:latest"),
            ("python", "previewd/builder-python:latest"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            images,
            memory: "1g".to_string(),
            cpus: 1.0,
            timeout: 300,
            network: None,
            env: HashMap::new(),
        }
    }
}

/// Raw `[sandbox]` table of `previewd.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct SandboxSection {
    images: Option<HashMap<String, String>>,
    memory: Option<String>,
    cpus: Option<f64>,
    timeout: Option<u64>,
    network: Option<String>,
    env: Option<HashMap<String, String>>,
}

impl SandboxConfig {
    /// Overlay a parsed `[sandbox]` table on the defaults. Configured images
    /// are merged into the built-in ones rather than replacing them.
    pub fn apply(&mut self, section: SandboxSection) {
        if let Some(images) = section.images {
            self.images.extend(images);
        }
        if let Some(memory) = section.memory {
            self.memory = memory;
        }
        if let Some(cpus) = section.cpus {
            self.cpus = cpus;
        }
        if let Some(timeout) = section.timeout {
            self.timeout = timeout;
        }
        if let Some(network) = section.network {
            self.network = Some(network);
        }
        if let Some(env) = section.env {
            self.env = env;
        }
    }

    pub fn image_for(&self, kind: &str) -> Option<&str> {
        self.images.get(kind).map(String::as_str)
    }

    /// Memory limit in bytes. Accepts a plain byte count or a `k`/`m`/`g` suffix.
    pub fn memory_bytes(&self) -> Result<i64> {
        parse_memory(&self.memory)
    }

    /// CPU limit in the runtime's nano-CPU unit.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0) as i64
    }
}

fn parse_memory(raw: &str) -> Result<i64> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, multiplier) = match raw.char_indices().last() {
        Some((idx, 'k')) => (&raw[..idx], 1024),
        Some((idx, 'm')) => (&raw[..idx], 1024 * 1024),
        Some((idx, 'g')) => (&raw[..idx], 1024 * 1024 * 1024),
        _ => (raw.as_str(), 1),
    };
    let value: i64 = match digits.parse() {
        Ok(v) if v > 0 => v,
        _ => bail!("Invalid memory limit '{}'", raw),
    };
    match value.checked_mul(multiplier) {
        Some(bytes) => Ok(bytes),
        None => bail!("Memory limit '{}' is too large", raw),
    }
}
