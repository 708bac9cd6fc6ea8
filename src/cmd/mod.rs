//! CLI command implementations.
//!
//! | Module   | Commands handled          |
//! |----------|---------------------------|
//! | `server` | `Serve`, `Init`, `Seed`   |
//! | `config` | `Config`                  |

pub mod config;
pub mod server;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use taskflow::config::{CliOverrides, LoggingSection, Settings, TaskflowToml};

use super::{Cli, Commands};

pub use config::cmd_config;
pub use server::{cmd_init, cmd_seed, cmd_serve};

/// Merge CLI flags over the config file over defaults.
pub fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let file = TaskflowToml::discover(cli.config.as_deref())?;
    let mut overrides = CliOverrides {
        db_path: cli.db_path.clone(),
        log_level: cli.log_level.clone(),
        ..CliOverrides::default()
    };
    if let Commands::Serve { port, host, dev } = &cli.command {
        overrides.port = *port;
        overrides.host = host.clone();
        overrides.dev_mode = *dev;
    }
    Ok(Settings::resolve(file, overrides))
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingSection, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
