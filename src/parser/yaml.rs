use serde_json::Value;

use super::{Parser, Scope, mapping};
use crate::tree::DependencyTree;

/// `quire.yaml` fragments, same shape as JSON ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParser;

impl Parser for YamlParser {
    fn build_ast(&self, scope: &Scope<'_>, text: &str) -> anyhow::Result<DependencyTree> {
        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(text)?
        };

        Ok(mapping::build_tree(scope, value)?)
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
    fn test_yaml_keeps_document_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let q = Qualifier::new(root, Arc::new(Registry::builtin()));
        let scope = Scope {
            qualifier: &q,
            directory: Utf8Path::new("."),
            config_dir: Utf8Path::new("."),
            path: Utf8Path::new("quire.yaml"),
        };

        let text = "\
zeta:
  - .md
  - report.tex|latex:
      depends:
        - .bib
alpha:
  title: Alpha
";
        let tree = YamlParser.build_ast(&scope, text).unwrap();
        let roots: Vec<_> = tree.roots().iter().map(TaskKey::as_str).collect();
        assert_eq!(roots, vec!["bundle:zeta", "bundle:alpha"]);

        let zeta = q.canonicalize("zeta").unwrap();
        let children: Vec<_> = tree.children_of(&zeta).unwrap().iter().map(TaskKey::as_str).collect();
        assert_eq!(children, vec!["pattern:*.md", "doc:report.tex|latex"]);

        let report = q.canonicalize("doc:report.tex|latex").unwrap();
        assert_eq!(tree.children_of(&report).unwrap().len(), 1);

        let alpha = q.canonicalize("alpha").unwrap();
        assert_eq!(tree.metadata_of(&alpha).unwrap()["title"], "Alpha");
    }
}
