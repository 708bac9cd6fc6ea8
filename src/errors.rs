//! Typed error hierarchy for TaskFlow.
//!
//! Two top-level enums cover the two subsystems:
//! - `BoardError`: board store, ordering, and access-control failures
//! - `ConfigError`: configuration loading failures

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the board subsystem (store, ordering engine, access control).
///
/// Store methods return `anyhow::Result`; domain failures are raised as a
/// `BoardError` inside the `anyhow::Error` and recovered with
/// [`BoardError::find`] at the HTTP boundary.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Member {id} not found")]
    MemberNotFound { id: i64 },

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Invalid status '{0}'")]
    InvalidStatus(String),

    #[error("Invalid priority '{0}'")]
    InvalidPriority(String),

    #[error("Invalid role '{0}'")]
    InvalidRole(String),

    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl BoardError {
    /// Find a `BoardError` anywhere in an `anyhow` error chain.
    pub fn find(err: &anyhow::Error) -> Option<&BoardError> {
        err.chain().find_map(|cause| cause.downcast_ref::<BoardError>())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}
