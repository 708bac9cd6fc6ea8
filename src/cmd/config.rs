//! Configuration view and validation commands: `taskflow config`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use taskflow::config::{CONFIG_DIR, CONFIG_FILE, Settings, TaskflowToml};

use super::super::ConfigCommands;

pub fn cmd_config(
    explicit: Option<&Path>,
    settings: &Settings,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            let server = &settings.server;
            println!("  server.host = \"{}\"", server.host);
            println!("  server.port = {}", server.port);
            println!("  server.dev_mode = {}", server.dev_mode);
            println!("  database.path = \"{}\"", server.db_path.display());
            println!("  auth.session_ttl_hours = {}", server.session_ttl_hours);
            println!("  logging.level = \"{}\"", settings.logging.level);
            println!("  logging.json = {}", settings.logging.json);
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No taskflow.toml found. Using defaults (valid).");
                return Ok(());
            }
            let warnings = TaskflowToml::load(&config_path)?.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("taskflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            TaskflowToml::default().save(&config_path)?;
            println!("Created taskflow.toml at {}", config_path.display());
        }
    }

    Ok(())
}
