//! Task keys and the heuristics that turn a raw configuration key into one.
//!
//! A raw key is whatever the user typed in a configuration fragment, e.g.
//! `report.md|jinja`, `.py|pyg` or `bundle:website`. The [`Qualifier`] splits
//! it into a category and a pattern, guessing the category when the key does
//! not spell it out, and produces a [`TaskKey`] in canonical
//! `category:pattern` form. Two spellings of the same task always end up as
//! the same `TaskKey`.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{ConfigError, InternalError, QuireError};
use crate::registry::Registry;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// Separates the category from the pattern in a qualified key.
pub const CATEGORY_DELIMITER: char = ':';

/// Separates a path from the chain of filters applied to it.
pub const MODIFIER_DELIMITER: char = '|';

/// Canonical `category:pattern` identity of a task.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(ArcStr);

impl TaskKey {
    pub(crate) fn from_parts(category: &str, pattern: &str) -> Self {
        Self(format!("{category}{CATEGORY_DELIMITER}{pattern}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> &str {
        self.split().0
    }

    pub fn pattern(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        // Canonical keys are always built by `from_parts`.
        self.0
            .split_once(CATEGORY_DELIMITER)
            .unwrap_or(("", &self.0))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskKey({})", self.0)
    }
}

impl AsRef<str> for TaskKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TaskKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Returns the path portion of a pattern, dropping any `|filter` chain.
pub fn strip_modifiers(pattern: &str) -> &str {
    pattern
        .split(MODIFIER_DELIMITER)
        .next()
        .unwrap_or(pattern)
}

/// Lexically normalizes a `/`-separated path the way POSIX `normpath` does,
/// regardless of the host path conventions.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Resolves raw keys against the registered categories and the files present
/// under the project root.
#[derive(Debug, Clone)]
pub struct Qualifier {
    root: Utf8PathBuf,
    registry: Arc<Registry>,
}

impl Qualifier {
    pub fn new(root: impl Into<Utf8PathBuf>, registry: Arc<Registry>) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.root.join(path).exists()
    }

    /// Splits a raw key into its canonical category and its pattern.
    ///
    /// Keys without an explicit category are classified in this order:
    /// 1. `.ext` becomes `*.ext` unless a file named `.ext` exists.
    /// 2. An existing path (ignoring filters) is a `doc`.
    /// 3. Anything without `.` or `|` is a `bundle`.
    /// 4. Anything containing `*` is a `pattern`.
    /// 5. Everything else is a `doc`.
    pub fn qualify(&self, key: &str) -> Result<(String, String), ConfigError> {
        let (category, pattern) = match key.split_once(CATEGORY_DELIMITER) {
            Some((category, pattern)) => (category.to_string(), pattern.to_string()),
            None => {
                let mut pattern = key.to_string();

                if pattern.starts_with('.') && !self.exists(&pattern) {
                    pattern.insert(0, '*');
                }

                let category = if self.exists(strip_modifiers(&pattern)) {
                    "doc"
                } else if !pattern.contains('.') && !pattern.contains(MODIFIER_DELIMITER) {
                    "bundle"
                } else if pattern.contains('*') {
                    "pattern"
                } else {
                    "doc"
                };

                (category.to_string(), pattern)
            }
        };

        let canonical = self.registry.standardize(&category).ok_or_else(|| {
            ConfigError::UnknownCategory {
                key: key.to_string(),
                category: category.clone(),
            }
        })?;

        Ok((canonical.to_string(), pattern))
    }

    /// Returns the canonical `category:pattern` form of a raw key.
    pub fn canonicalize(&self, key: &str) -> Result<TaskKey, ConfigError> {
        let (category, pattern) = self.qualify(key)?;
        Ok(TaskKey::from_parts(&category, &pattern))
    }

    /// Rebases a key found in a fragment that applies to `directory` so that
    /// it is relative to the project root.
    ///
    /// `config_dir` is the directory the fragment was read from. Returns
    /// `None` when the key does not apply at this directory level: docs must
    /// exist or be declared next to their fragment, bundles never inherit
    /// into subdirectories.
    pub fn adjust_key(
        &self,
        directory: &Utf8Path,
        config_dir: &Utf8Path,
        key: &str,
    ) -> Result<Option<TaskKey>, QuireError> {
        let (category, pattern) = self.qualify(key)?;

        let adjusted = if directory.as_str() == "." {
            pattern
        } else if pattern.starts_with('/') {
            normalize(&pattern)
        } else {
            normalize(&format!("{directory}/{pattern}"))
        };

        let local = directory == config_dir;
        let accepted = match category.as_str() {
            "pattern" => true,
            "doc" => self.exists(strip_modifiers(&adjusted)) || local,
            "bundle" => local,
            _ => return Err(InternalError::UnhandledCategory(category).into()),
        };

        Ok(accepted.then(|| TaskKey::from_parts(&category, &adjusted)))
    }
}
