use std::fs;

use anyhow::Context;
use serde_json::Value;

use super::{Phase, Task, TaskContext, TaskSpec};
use crate::hash::Hash32;
use crate::key::{MODIFIER_DELIMITER, strip_modifiers};

/// A single document, optionally run through a chain of `|filter`s.
#[derive(Debug)]
pub struct DocTask {
    pattern: String,
    contents: Option<String>,
}

impl DocTask {
    pub fn new(spec: TaskSpec) -> Self {
        let contents = spec
            .options
            .get("contents")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Self {
            pattern: spec.pattern,
            contents,
        }
    }

    pub fn path(&self) -> &str {
        strip_modifiers(&self.pattern)
    }

    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.pattern.split(MODIFIER_DELIMITER).skip(1)
    }
}

impl Task for DocTask {
    fn invoke(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        if ctx.phase != Phase::Populating {
            return ctx.settle();
        }

        let hash = match &self.contents {
            Some(contents) => Hash32::hash(contents),
            None => {
                let path = ctx.root.join(self.path());
                let bytes = fs::read(&path).with_context(|| {
                    format!("Document '{path}' doesn't exist and has no 'contents'")
                })?;
                Hash32::hash(bytes)
            }
        };

        ctx.set_content(hash);
        Ok(())
    }

    /// Every stage of the filter chain, starting from the bare file.
    fn artifacts(&self) -> Vec<String> {
        let mut stage = self.path().to_string();
        let mut stages = vec![stage.clone()];

        for filter in self.filters() {
            stage.push(MODIFIER_DELIMITER);
            stage.push_str(filter);
            stages.push(stage.clone());
        }

        stages
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use camino::Utf8PathBuf;
    use serde_json::json;

    use super::*;
    use crate::config::RunConfig;
    use crate::database::MemoryDatabase;
    use crate::key::TaskKey;
    use crate::task::Ledger;

    fn spec(pattern: &str, options: Value) -> TaskSpec {
        TaskSpec {
            key: TaskKey::from_parts("doc", pattern),
            category: "doc".into(),
            pattern: pattern.into(),
            children: Vec::new(),
            options: options.as_object().cloned().unwrap_or_default(),
            config: Arc::new(RunConfig::default()),
        }
    }

    fn populate(task: &mut DocTask, root: &Utf8PathBuf, key: &TaskKey) -> anyhow::Result<Ledger> {
        let mut ledger = Ledger::new();
        let mut db = MemoryDatabase::new();
        let mut ctx = TaskContext {
            phase: Phase::Populating,
            batch_id: 1,
            key,
            children: &[],
            root,
            ledger: &mut ledger,
            db: &mut db,
        };
        task.invoke(&mut ctx)?;
        Ok(ledger)
    }

    #[test]
    fn test_artifacts_list_filter_stages() {
        let task = DocTask::new(spec("a.py|pyg|h", Value::Null));
        assert_eq!(task.path(), "a.py");
        assert_eq!(task.artifacts(), vec!["a.py", "a.py|pyg", "a.py|pyg|h"]);
    }

    #[test]
    fn test_hashes_file_or_contents() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();

        let key = TaskKey::from_parts("doc", "a.txt|up");
        let mut task = DocTask::new(spec("a.txt|up", Value::Null));
        let ledger = populate(&mut task, &root, &key).unwrap();
        assert_eq!(ledger.get(&key).unwrap().content, Some(Hash32::hash("hello")));

        let key = TaskKey::from_parts("doc", "b.txt");
        let mut task = DocTask::new(spec("b.txt", json!({"contents": "inline"})));
        let ledger = populate(&mut task, &root, &key).unwrap();
        assert_eq!(ledger.get(&key).unwrap().content, Some(Hash32::hash("inline")));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let key = TaskKey::from_parts("doc", "gone.txt");
        let mut task = DocTask::new(spec("gone.txt", Value::Null));
        let err = populate(&mut task, &root, &key).unwrap_err();
        assert!(err.to_string().contains("gone.txt"));
    }
}
