//! Configuration syntaxes.
//!
//! A [`Parser`] turns the text of one configuration fragment into a
//! [`DependencyTree`]. Keys it records must go through [`Scope::adjust`] so
//! that fragments inherited from parent directories apply correctly.

mod json;
mod mapping;
mod text;
#[cfg(feature = "yaml")]
mod yaml;

use camino::Utf8Path;
use petgraph::graph::NodeIndex;

use crate::error::{ConfigError, InternalError, PluginError, QuireError};
use crate::graph::{Materializer, TaskGraph};
use crate::key::{Qualifier, TaskKey};
use crate::tree::DependencyTree;

pub use json::JsonParser;
pub use text::TextParser;
#[cfg(feature = "yaml")]
pub use yaml::YamlParser;

pub trait Parser: Send + Sync {
    fn build_ast(&self, scope: &Scope<'_>, text: &str) -> anyhow::Result<DependencyTree>;
}

/// Where a fragment is being applied.
pub struct Scope<'a> {
    pub qualifier: &'a Qualifier,
    /// Directory the keys are resolved for.
    pub directory: &'a Utf8Path,
    /// Directory the fragment was found in, `directory` or one of its
    /// ancestors.
    pub config_dir: &'a Utf8Path,
    /// The fragment itself, for diagnostics.
    pub path: &'a Utf8Path,
}

impl Scope<'_> {
    pub fn tree(&self) -> DependencyTree {
        DependencyTree::new(self.qualifier.clone())
    }

    pub fn adjust(&self, key: &str) -> Result<Option<TaskKey>, QuireError> {
        self.qualifier
            .adjust_key(self.directory, self.config_dir, key)
    }

    pub fn malformed(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::MalformedEntry {
            path: self.path.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Builds the tree for one fragment and materializes it into `graph`,
/// returning the new root tasks.
pub fn parse(
    parser: &dyn Parser,
    name: &str,
    scope: &Scope<'_>,
    text: &str,
    materializer: &Materializer,
    graph: &mut TaskGraph,
) -> Result<Vec<NodeIndex>, QuireError> {
    let tree = parser
        .build_ast(scope, text)
        .map_err(|err| into_quire_error(err, scope.path, name))?;

    tracing::debug!(
        "dependency tree for '{}' applied to '{}':\n{tree}",
        scope.path,
        scope.directory
    );

    materializer.materialize(&tree, graph)
}

/// Errors of our own pass through unchanged, anything else is blamed on the
/// parser.
fn into_quire_error(err: anyhow::Error, path: &Utf8Path, parser: &str) -> QuireError {
    let err = match err.downcast::<QuireError>() {
        Ok(err) => return err,
        Err(err) => err,
    };
    let err = match err.downcast::<ConfigError>() {
        Ok(err) => return err.into(),
        Err(err) => err,
    };
    match err.downcast::<InternalError>() {
        Ok(err) => err.into(),
        Err(source) => PluginError::Parser {
            path: path.to_owned(),
            parser: parser.to_string(),
            source,
        }
        .into(),
    }
}
