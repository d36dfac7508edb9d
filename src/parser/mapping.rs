//! Shared reader for syntaxes that decode into a JSON-like value.
//!
//! The top level maps task keys to values. A value is `null`, a sequence of
//! children, or a mapping of options whose `depends` entry lists children. A
//! child is a key, or a mapping from child keys to values of the same shape.

use serde_json::Value;

use super::Scope;
use crate::error::QuireError;
use crate::key::TaskKey;
use crate::tree::{DependencyTree, Options};

/// Option name reserved for listing children inside an options mapping.
pub const DEPENDS: &str = "depends";

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

pub(crate) fn build_tree(scope: &Scope<'_>, value: Value) -> Result<DependencyTree, QuireError> {
    let mut tree = scope.tree();

    let entries = match value {
        Value::Null => return Ok(tree),
        Value::Object(entries) => entries,
        other => {
            let reason = format!("expected a mapping of tasks, found {}", kind(&other));
            return Err(scope.malformed(reason).into());
        }
    };

    for (raw, value) in entries {
        if let Some(key) = scope.adjust(&raw)? {
            record(scope, &mut tree, &key, value)?;
        }
    }

    Ok(tree)
}

fn record(
    scope: &Scope<'_>,
    tree: &mut DependencyTree,
    key: &TaskKey,
    value: Value,
) -> Result<(), QuireError> {
    let (options, children) = match value {
        Value::Null => (Options::new(), Vec::new()),
        Value::Array(children) => (Options::new(), children),
        Value::Object(mut options) => {
            let children = match options.remove(DEPENDS) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(children)) => children,
                Some(other) => {
                    let reason = format!(
                        "'{DEPENDS}' of '{key}' must be a sequence, found {}",
                        kind(&other)
                    );
                    return Err(scope.malformed(reason).into());
                }
            };
            (options, children)
        }
        other => {
            let reason = format!("entry '{key}' can't be {}", kind(&other));
            return Err(scope.malformed(reason).into());
        }
    };

    tree.record_metadata(key.as_str(), options)?;

    for child in children {
        match child {
            Value::String(raw) => {
                if let Some(child) = scope.adjust(&raw)? {
                    tree.record_dependency(key.as_str(), child.as_str())?;
                }
            }
            Value::Object(nested) => {
                for (raw, value) in nested {
                    if let Some(child) = scope.adjust(&raw)? {
                        record(scope, tree, &child, value)?;
                        tree.record_dependency(key.as_str(), child.as_str())?;
                    }
                }
            }
            other => {
                let reason = format!("child of '{key}' can't be {}", kind(&other));
                return Err(scope.malformed(reason).into());
            }
        }
    }

    Ok(())
}
