use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "previewd")]
#[command(version, about = "Per-review preview instances with comments and questionnaires")]
pub struct Cli {
    /// Path to previewd.toml (defaults to ./previewd.toml when present)
    #[arg(long, global = true, env = "PREVIEWD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Create the database schema and exit
    Init {
        /// SQLite database file
        #[arg(long, default_value = "previewd.db")]
        db_path: PathBuf,

        /// PostgreSQL URL; selects PostgreSQL instead of SQLite
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Insert the fixture identities, container and review data
        #[arg(long)]
        seed: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Domain under which instance subdomains are served
    #[arg(long)]
    pub base_domain: Option<String>,

    /// SQLite database file
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// PostgreSQL URL; selects PostgreSQL instead of SQLite
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Use an in-memory SQLite database
    #[arg(long)]
    pub memory: bool,

    /// Insert fixture data on first start
    #[arg(long)]
    pub seed: bool,

    /// Development mode: verbose errors and permissive CORS
    #[arg(long)]
    pub dev: bool,

    /// Emit JSON logs on stdout
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before parsing so clap's `env` fallbacks see it.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve(args) => cmd::cmd_serve(cli.config.as_deref(), args).await?,
        Commands::Init {
            db_path,
            database_url,
            seed,
        } => cmd::cmd_init(db_path, database_url.as_deref(), *seed).await?,
        Commands::Config { command } => cmd::cmd_config(cli.config.as_deref(), command.clone())?,
    }

    Ok(())
}
