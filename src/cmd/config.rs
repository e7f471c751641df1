//! Configuration view and validation commands: `previewd config`.

use std::path::Path;

use anyhow::Result;
use previewd::config::{CONFIG_FILE, PreviewdConfig};

use super::super::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let mut config = PreviewdConfig::load_or_default(config_path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    let source = config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| CONFIG_FILE.to_string());

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("previewd configuration ({})", source);
            println!();
            println!("[server]");
            println!("  host = \"{}\"", config.server.host);
            println!("  port = {}", config.server.port);
            println!("  base_domain = \"{}\"", config.server.base_domain);
            println!("  environment = \"{}\"", config.server.environment);
            println!("  log_json = {}", config.server.log_json);
            if let Some(dir) = &config.server.log_dir {
                println!("  log_dir = \"{}\"", dir.display());
            }
            println!();
            println!("[database]");
            match &config.database.url {
                Some(_) => println!("  url = <set>"),
                None if config.database.in_memory => println!("  in_memory = true"),
                None => println!("  path = \"{}\"", config.database.path.display()),
            }
            println!("  max_connections = {}", config.database.max_connections);
            println!();
            println!("[sandbox]");
            println!("  memory = \"{}\"", config.sandbox.memory);
            println!("  cpus = {}", config.sandbox.cpus);
            println!("  timeout = {}", config.sandbox.timeout);
            let mut kinds: Vec<_> = config.sandbox.images.iter().collect();
            kinds.sort();
            for (kind, image) in kinds {
                println!("  images.{} = \"{}\"", kind, image);
            }
            println!();
            println!("[auth]");
            println!("  token_ttl_hours = {}", config.auth.token_ttl_hours);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
