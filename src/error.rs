use camino::Utf8PathBuf;
use thiserror::Error;

use crate::key::TaskKey;
use crate::task::Phase;

/// Errors the user can fix by changing their configuration or project layout.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown category '{category}' in key '{key}'")]
    UnknownCategory { key: String, category: String },

    #[error("Malformed entry in '{path}': {reason}")]
    MalformedEntry { path: Utf8PathBuf, reason: String },

    #[error(
        "Directories '{artifacts}' and '{logs}' must exist, run the setup step in this directory first."
    )]
    MissingDirectories {
        artifacts: Utf8PathBuf,
        logs: Utf8PathBuf,
    },

    #[error("'{0}' is not a valid log level, expected one of TRACE, DEBUG, INFO, WARN, ERROR")]
    InvalidLogLevel(String),

    #[error("Unknown database backend '{0}'")]
    UnknownDatabase(String),

    #[error("Dependency cycle detected through '{0}'")]
    DependencyCycle(TaskKey),

    #[error("Alias '{0}' is already registered")]
    DuplicateAlias(String),

    #[error("A category needs at least one alias")]
    EmptyAliases,

    #[error("Couldn't read run configuration '{path}'.\n{source}")]
    ReadRunConfig {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse run configuration '{path}'.\n{source}")]
    ParseRunConfig {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
}

/// Broken invariants inside the crate itself. These are never expected to be
/// caught and recovered from.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("Key '{0}' is not present in the dependency tree")]
    UnknownKey(TaskKey),

    #[error("Don't know how to add task of category '{0}'")]
    UnhandledCategory(String),

    #[error("No database backend is open")]
    NoDatabase,
}

/// Failures coming from plugins: parsers, tasks, backends and the files they
/// read.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Couldn't read '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Parser '{parser}' failed on '{path}'.\n{source}")]
    Parser {
        path: Utf8PathBuf,
        parser: String,
        source: anyhow::Error,
    },

    #[error("Couldn't create task '{key}' ({category}).\n{source}")]
    Create {
        key: TaskKey,
        category: String,
        source: anyhow::Error,
    },

    #[error("Task '{key}' ({category}) failed while {phase}.\n{source}")]
    Task {
        key: TaskKey,
        category: String,
        phase: Phase,
        source: anyhow::Error,
    },

    #[error("Database backend '{alias}':\n{source}")]
    Database {
        alias: String,
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum QuireError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
