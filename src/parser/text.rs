use serde_json::Value;

use super::{Parser, Scope};
use crate::tree::DependencyTree;

/// `quire.txt` fragments: one task key per line, optionally followed by a
/// JSON object of options. Lines starting with `#` are comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl Parser for TextParser {
    fn build_ast(&self, scope: &Scope<'_>, text: &str) -> anyhow::Result<DependencyTree> {
        let mut tree = scope.tree();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (raw, rest) = line
                .split_once(char::is_whitespace)
                .map_or((line, ""), |(raw, rest)| (raw, rest.trim()));

            let options = if rest.is_empty() {
                Default::default()
            } else {
                match serde_json::from_str(rest) {
                    Ok(Value::Object(options)) => options,
                    _ => {
                        let reason =
                            format!("line {}: options must be a JSON object", number + 1);
                        return Err(scope.malformed(reason).into());
                    }
                }
            };

            if let Some(key) = scope.adjust(raw)? {
                tree.record_metadata(key.as_str(), options)?;
            }
        }

        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::key::{Qualifier, TaskKey};
    use crate::registry::Registry;

    #[test]
    fn test_lines() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let q = Qualifier::new(root, Arc::new(Registry::builtin()));
        let scope = Scope {
            qualifier: &q,
            directory: Utf8Path::new("."),
            config_dir: Utf8Path::new("."),
            path: Utf8Path::new("quire.txt"),
        };

        let text = "# docs\n\n.md\nintro.txt|up   {\"contents\": \"hi\"}\n";
        let tree = TextParser.build_ast(&scope, text).unwrap();
        let roots: Vec<_> = tree.roots().iter().map(TaskKey::as_str).collect();
        assert_eq!(roots, vec!["pattern:*.md", "doc:intro.txt|up"]);

        let intro = q.canonicalize("doc:intro.txt|up").unwrap();
        assert_eq!(tree.metadata_of(&intro).unwrap()["contents"], "hi");

        assert!(TextParser.build_ast(&scope, "a.txt [1]").is_err());
    }
}
