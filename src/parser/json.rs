use serde_json::Value;

use super::{Parser, Scope, mapping};
use crate::tree::DependencyTree;

/// `quire.json` fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn build_ast(&self, scope: &Scope<'_>, text: &str) -> anyhow::Result<DependencyTree> {
        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(text)?
        };

        Ok(mapping::build_tree(scope, value)?)
    }
}
