use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "taskflow")]
#[command(version, about = "Collaborative kanban task board server")]
pub struct Cli {
    /// Debug-level logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log filter when RUST_LOG is unset. Overrides logging.level from the config file.
    #[arg(long, global = true, env = "TASKFLOW_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to taskflow.toml. Defaults to .taskflow/taskflow.toml if present.
    #[arg(long, global = true, env = "TASKFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path. Overrides database.path from the config file.
    #[arg(long, global = true, env = "TASKFLOW_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and WebSocket change feed
    Serve {
        #[arg(short, long, env = "TASKFLOW_PORT")]
        port: Option<u16>,

        #[arg(long, env = "TASKFLOW_HOST")]
        host: Option<String>,

        /// Enable dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and run migrations
    Init,
    /// Insert demo users, a demo project and its tasks
    Seed,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default taskflow.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = cmd::resolve_settings(&cli)?;
    cmd::init_tracing(&settings.logging, cli.verbose);

    match &cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(settings).await?,
        Commands::Init => cmd::cmd_init(&settings.server.db_path)?,
        Commands::Seed => cmd::cmd_seed(&settings.server.db_path)?,
        Commands::Config { command } => {
            cmd::cmd_config(cli.config.as_deref(), &settings, command.clone())?
        }
    }

    Ok(())
}
