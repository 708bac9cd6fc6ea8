//! Layered configuration for TaskFlow.
//!
//! Values come from, in increasing precedence: built-in defaults, the TOML
//! file (`.taskflow/taskflow.toml` or `--config`), then CLI flags and their
//! environment-variable fallbacks.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [database]
//! path = ".taskflow/taskflow.db"
//!
//! [auth]
//! session_ttl_hours = 168
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::server::ServerConfig;
use crate::errors::ConfigError;

pub const CONFIG_DIR: &str = ".taskflow";
pub const CONFIG_FILE: &str = "taskflow.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served front-end.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    Path::new(CONFIG_DIR).join("taskflow.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u32,
}

fn default_session_ttl_hours() -> u32 {
    24 * 7
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Parsed `taskflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskflowToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskflowToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `taskflow.toml` from `config_dir`, or defaults if it is absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize taskflow.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// An explicit `--config` must exist; otherwise fall back to the default location.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::load_or_default(Path::new(CONFIG_DIR)),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.auth.session_ttl_hours == 0 {
            warnings.push("auth.session_ttl_hours is 0: every session expires immediately".into());
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0: an ephemeral port will be chosen".into());
        }
        warnings
    }
}

/// Values given on the command line (or via their environment variables).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
    pub log_level: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingSection,
}

impl Settings {
    pub fn resolve(file: TaskflowToml, cli: CliOverrides) -> Self {
        let server = ServerConfig {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            db_path: cli.db_path.unwrap_or(file.database.path),
            dev_mode: cli.dev_mode || file.server.dev_mode,
            session_ttl_hours: file.auth.session_ttl_hours,
        };
        let logging = LoggingSection {
            level: cli.log_level.unwrap_or(file.logging.level),
            json: file.logging.json,
        };
        Self { server, logging }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = TaskflowToml::parse("").unwrap();
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from(".taskflow/taskflow.db"));
        assert_eq!(config.auth.session_ttl_hours, 168);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_sections() {
        let config = TaskflowToml::parse(
            r#"
            [server]
            port = 8080

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = TaskflowToml::parse("[server\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_read_error() {
        let err = TaskflowToml::discover(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[database]\npath = \"/tmp/board.db\"\n",
        )
        .unwrap();
        let config = TaskflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/board.db"));

        let empty = tempfile::tempdir().unwrap();
        let config = TaskflowToml::load_or_default(empty.path()).unwrap();
        assert_eq!(config.server.port, 3141);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = TaskflowToml::default();
        config.server.port = 5000;
        config.logging.level = "debug".into();
        config.save(&path).unwrap();

        let loaded = TaskflowToml::load(&path).unwrap();
        assert_eq!(loaded.server.port, 5000);
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = TaskflowToml::parse("[server]\nport = 9000\nhost = \"0.0.0.0\"").unwrap();
        let settings = Settings::resolve(
            file,
            CliOverrides {
                port: Some(4000),
                dev_mode: true,
                ..CliOverrides::default()
            },
        );
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.server.dev_mode);
    }

    #[test]
    fn test_log_level_override() {
        let file = TaskflowToml::parse("[logging]\nlevel = \"warn\"\njson = true").unwrap();
        let settings = Settings::resolve(file.clone(), CliOverrides::default());
        assert_eq!(settings.logging.level, "warn");

        let settings = Settings::resolve(
            file,
            CliOverrides {
                log_level: Some("taskflow=trace".into()),
                ..CliOverrides::default()
            },
        );
        assert_eq!(settings.logging.level, "taskflow=trace");
        assert!(settings.logging.json);
    }

    #[test]
    fn test_validate_warns_on_zero_ttl() {
        let config = TaskflowToml::parse("[auth]\nsession_ttl_hours = 0").unwrap();
        assert_eq!(config.validate().len(), 1);
        assert!(TaskflowToml::default().validate().is_empty());
    }
}
