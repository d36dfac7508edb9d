use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Options fixed for the duration of a run.
///
/// Relative directories resolve against `root`. The database file lives
/// inside the artifacts directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub root: Utf8PathBuf,
    pub artifacts_dir: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
    pub log_file: String,
    pub log_level: String,
    pub db_alias: String,
    pub db_file: String,
    /// Comma-separated directory names never scanned for configuration.
    pub exclude: String,
    /// Only roots whose key starts with this prefix run.
    pub target: Option<String>,
    pub silent: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            artifacts_dir: Utf8PathBuf::from("artifacts"),
            log_dir: Utf8PathBuf::from("logs"),
            log_file: "quire.log".into(),
            log_level: "DEBUG".into(),
            db_alias: "json".into(),
            db_file: "quire-db.json".into(),
            exclude: ".git, .svn, tmp, cache, artifacts, logs, output, output-long".into(),
            target: None,
            silent: false,
        }
    }
}

impl RunConfig {
    /// Reads a TOML run configuration, usually `quire.toml`.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadRunConfig {
            path: path.to_owned(),
            source,
        })?;

        toml::from_str(&text).map_err(|source| ConfigError::ParseRunConfig {
            path: path.to_owned(),
            source,
        })
    }

    pub fn with_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_db_alias(mut self, alias: impl Into<String>) -> Self {
        self.db_alias = alias.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn artifacts_path(&self) -> Utf8PathBuf {
        self.root.join(&self.artifacts_dir)
    }

    pub fn log_dir_path(&self) -> Utf8PathBuf {
        self.root.join(&self.log_dir)
    }

    pub fn db_path(&self) -> Utf8PathBuf {
        self.artifacts_path().join(&self.db_file)
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.log_dir_path().join(&self.log_file)
    }

    pub fn exclude_dirs(&self) -> Vec<String> {
        self.exclude
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
