use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};

use super::{Phase, Task, TaskContext, TaskSpec};
use crate::hash::Hash32;
use crate::key::{MODIFIER_DELIMITER, strip_modifiers};

/// Every file matching a glob, each run through the same filter chain.
#[derive(Debug)]
pub struct PatternTask {
    pattern: String,
    matches: Vec<String>,
}

impl PatternTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            pattern: spec.pattern,
            matches: Vec::new(),
        }
    }

    /// The `|filter` chain including its leading delimiter, or `""`.
    fn modifiers(&self) -> &str {
        self.pattern
            .find(MODIFIER_DELIMITER)
            .map_or("", |index| &self.pattern[index..])
    }

    /// Files under `root` matching the path part of the pattern, relative to
    /// `root` and sorted.
    fn expand(&self, root: &Utf8Path) -> anyhow::Result<Vec<String>> {
        let entry = format!("{}/{}", Pattern::escape(root.as_str()), strip_modifiers(&self.pattern));

        let mut found = Vec::new();
        for path in glob(&entry)? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path.as_path());
            let relative: Vec<&str> = relative.components().map(|c| c.as_str()).collect();
            found.push(relative.join("/"));
        }

        found.sort();
        Ok(found)
    }

    pub fn matches(&self) -> &[String] {
        &self.matches
    }
}

impl Task for PatternTask {
    fn invoke(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        if ctx.phase != Phase::Populating {
            return ctx.settle();
        }

        self.matches = self.expand(ctx.root)?;
        tracing::debug!(pattern = %self.pattern, count = self.matches.len(), "expanded pattern");

        let mut parts = Vec::with_capacity(self.matches.len() * 2);
        for name in &self.matches {
            let path = ctx.root.join(name);
            let bytes = fs::read(&path).with_context(|| format!("Couldn't read '{path}'"))?;
            parts.push(Hash32::hash(name));
            parts.push(Hash32::hash(bytes));
        }

        ctx.set_content(Hash32::combine(parts));
        Ok(())
    }

    fn artifacts(&self) -> Vec<String> {
        let modifiers = self.modifiers();
        self.matches
            .iter()
            .map(|name| format!("{name}{modifiers}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RunConfig;
    use crate::database::MemoryDatabase;
    use crate::key::TaskKey;
    use crate::task::Ledger;

    #[test]
    fn test_expands_sorted_relative_matches() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.py"), "b").unwrap();
        fs::write(root.join("sub/a.py"), "a").unwrap();
        fs::write(root.join("sub/c.txt"), "c").unwrap();

        let key = TaskKey::from_parts("pattern", "sub/*.py|pyg");
        let mut task = PatternTask::new(TaskSpec {
            key: key.clone(),
            category: "pattern".into(),
            pattern: "sub/*.py|pyg".into(),
            children: Vec::new(),
            options: Default::default(),
            config: Arc::new(RunConfig::default()),
        });

        let mut ledger = Ledger::new();
        let mut db = MemoryDatabase::new();
        let mut ctx = TaskContext {
            phase: Phase::Populating,
            batch_id: 1,
            key: &key,
            children: &[],
            root: &root,
            ledger: &mut ledger,
            db: &mut db,
        };
        task.invoke(&mut ctx).unwrap();

        assert_eq!(task.matches(), ["sub/a.py", "sub/b.py"]);
        assert_eq!(task.artifacts(), vec!["sub/a.py|pyg", "sub/b.py|pyg"]);
        assert!(ledger.get(&key).unwrap().content.is_some());
    }
}
