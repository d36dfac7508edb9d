//! The batch orchestrator.
//!
//! A [`Project`] discovers configuration fragments under its root, turns them
//! into a task graph and drives every selected task through the three phases
//! of a numbered batch. Each phase is swept over all selected tasks before
//! the next one starts.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::RunConfig;
use crate::database::Database;
use crate::error::{ConfigError, InternalError, PluginError, QuireError};
use crate::graph::{Materializer, TaskGraph};
use crate::key::{Qualifier, TaskKey};
use crate::logging;
use crate::parser::{self, Parser, Scope};
use crate::registry::Registry;
use crate::scan::{Scanner, Walk, ancestors};
use crate::task::{Ledger, Phase, TaskContext};
use crate::tree::Options;
use crate::utils::{PROGRESS_STYLE, as_overhead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Populating,
    SettingUp,
    Running,
    Complete,
}

impl From<Phase> for RunState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Populating => RunState::Populating,
            Phase::SettingUp => RunState::SettingUp,
            Phase::Running => RunState::Running,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub id: u64,
    pub start: SystemTime,
    pub end: Option<SystemTime>,
    pub elapsed: Option<Duration>,
}

impl Batch {
    fn new(id: u64) -> Self {
        Self {
            id,
            start: SystemTime::now(),
            end: None,
            elapsed: None,
        }
    }
}

/// A configuration file found in one of a directory's ancestors.
pub struct Fragment {
    /// Directory holding the file, relative to the root.
    pub config_dir: String,
    pub filename: String,
    /// The file, relative to the root.
    pub path: Utf8PathBuf,
    pub text: String,
    pub parser: Arc<dyn Parser>,
}

pub struct Project {
    config: Arc<RunConfig>,
    registry: Arc<Registry>,
    qualifier: Qualifier,
    scanner: Scanner,
    tasks: TaskGraph,
    roots: Vec<NodeIndex>,
    state: RunState,
    batch: Option<Batch>,
    database: Option<Box<dyn Database>>,
    graph: Option<String>,
}

impl Project {
    pub fn new(config: RunConfig) -> Self {
        Self::with_registry(config, Registry::builtin())
    }

    pub fn with_registry(config: RunConfig, registry: Registry) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(registry);

        Self {
            qualifier: Qualifier::new(config.root.clone(), registry.clone()),
            scanner: Scanner::new(config.root.clone(), config.exclude_dirs()),
            config,
            registry,
            tasks: TaskGraph::new(),
            roots: Vec::new(),
            state: RunState::Idle,
            batch: None,
            database: None,
            graph: None,
        }
    }

    fn materializer(&self) -> Materializer {
        Materializer::new(self.registry.clone(), self.config.clone())
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Creates the artifacts and log directories.
    pub fn setup_dirs(&self) -> Result<(), QuireError> {
        fs::create_dir_all(self.config.artifacts_path())?;
        fs::create_dir_all(self.config.log_dir_path())?;
        Ok(())
    }

    pub fn remove_dirs(&self) -> Result<(), QuireError> {
        for dir in [self.config.artifacts_path(), self.config.log_dir_path()] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn check_dirs(&self) -> Result<(), ConfigError> {
        let artifacts = self.config.artifacts_path();
        let logs = self.config.log_dir_path();

        if artifacts.is_dir() && logs.is_dir() {
            Ok(())
        } else {
            Err(ConfigError::MissingDirectories { artifacts, logs })
        }
    }

    /// Every `(directory, filename)` pair under the root, honoring `exclude`
    /// and stop markers.
    pub fn walk(&self) -> Walk<'_> {
        self.scanner.walk(".")
    }

    /// The fragments applying to `dir`, from the root down to `dir` itself,
    /// in parser registration order within each directory.
    pub fn config_for_directory(&self, dir: &str) -> Result<Vec<Fragment>, QuireError> {
        let mut fragments = Vec::new();

        for ancestor in ancestors(dir) {
            for (filename, parser) in self.registry.parsers() {
                let path = match ancestor.as_str() {
                    "." => Utf8PathBuf::from(filename),
                    _ => Utf8Path::new(&ancestor).join(filename),
                };

                let full = self.config.root.join(&path);
                if !full.is_file() {
                    continue;
                }

                tracing::debug!("found config fragment '{path}'");
                let text = fs::read_to_string(&full).map_err(|source| PluginError::Read {
                    path: path.clone(),
                    source,
                })?;

                fragments.push(Fragment {
                    config_dir: ancestor.clone(),
                    filename: filename.to_string(),
                    path,
                    text,
                    parser: parser.clone(),
                });
            }
        }

        Ok(fragments)
    }

    /// Parses every fragment for every directory and collects the resulting
    /// root tasks.
    pub fn load_doc_config(&mut self) -> Result<(), QuireError> {
        let materializer = self.materializer();
        let dirs: Vec<String> = self.scanner.directories(".").collect::<Result<_, _>>()?;

        for dir in dirs {
            for fragment in self.config_for_directory(&dir)? {
                let scope = Scope {
                    qualifier: &self.qualifier,
                    directory: Utf8Path::new(&dir),
                    config_dir: Utf8Path::new(&fragment.config_dir),
                    path: &fragment.path,
                };

                let roots = parser::parse(
                    fragment.parser.as_ref(),
                    &fragment.filename,
                    &scope,
                    &fragment.text,
                    &materializer,
                    &mut self.tasks,
                )?;

                self.roots.extend(roots);
            }
        }

        tracing::info!(
            "loaded {} tasks with {} roots",
            self.tasks.len(),
            self.roots.len()
        );
        Ok(())
    }

    /// Creates a root task straight from a key, bypassing configuration.
    pub fn add_root(&mut self, key: &str, options: Options) -> Result<NodeIndex, QuireError> {
        let key = self.qualifier.canonicalize(key)?;
        let index = self
            .materializer()
            .construct(&key, options, Vec::new(), &mut self.tasks)?;

        self.roots.push(index);
        Ok(index)
    }

    /// Runs a batch over the given keys only.
    pub fn run_keys(&mut self, keys: &[&str]) -> Result<Batch, QuireError> {
        self.setup_dirs()?;
        for key in keys {
            self.add_root(key, Options::new())?;
        }
        self.run()
    }

    /// Runs one batch. Roots are discovered from configuration unless some
    /// were added beforehand.
    pub fn run(&mut self) -> Result<Batch, QuireError> {
        self.check_dirs()?;
        let _guard = logging::init(&self.config)?;
        let start = Instant::now();

        tracing::debug!(config = ?self.config, "starting run");

        let mut database = self.registry.open_database(&self.config)?;
        let id = database
            .next_batch_id()
            .map_err(|source| self.database_error(source))?;

        tracing::info!("batch {id}");
        let mut batch = Batch::new(id);
        self.batch = Some(batch.clone());

        if !self.config.silent {
            eprintln!(
                "{} batch {} in '{}'",
                style("Running").green().bold(),
                id,
                self.config.root
            );
        }

        if let Err(err) = self.sweep_all(database.as_mut(), id) {
            tracing::error!("batch {id} aborted: {err}");
            if let Err(save) = database.save() {
                tracing::error!("couldn't save the partial batch: {save}");
            }
            self.database = Some(database);
            return Err(err);
        }

        let saved = database.save();
        self.database = Some(database);
        saved.map_err(|source| self.database_error(source))?;

        self.state = RunState::Complete;
        self.graph = Some(self.tasks.dot().to_string());

        batch.end = Some(SystemTime::now());
        batch.elapsed = Some(start.elapsed());
        self.batch = Some(batch.clone());

        tracing::info!("batch {id} finished in {:?}", start.elapsed());
        if !self.config.silent {
            eprintln!(
                "{} batch {} with {} tasks {}",
                style("Finished").green().bold(),
                id,
                self.tasks.len(),
                as_overhead(start)
            );
        }

        Ok(batch)
    }

    fn database_error(&self, source: anyhow::Error) -> PluginError {
        PluginError::Database {
            alias: self.config.db_alias.clone(),
            source,
        }
    }

    fn sweep_all(&mut self, database: &mut dyn Database, batch_id: u64) -> Result<(), QuireError> {
        if self.roots.is_empty() {
            self.load_doc_config()?;
        }

        let roots = self.select_roots();
        let order = self.tasks.sweep_order(&roots);
        let mut ledger = Ledger::new();

        for phase in Phase::ALL {
            self.state = phase.into();
            self.sweep(phase, &order, batch_id, &mut ledger, database)?;
        }

        Ok(())
    }

    fn sweep(
        &mut self,
        phase: Phase,
        order: &[NodeIndex],
        batch_id: u64,
        ledger: &mut Ledger,
        database: &mut dyn Database,
    ) -> Result<(), QuireError> {
        let s = Instant::now();

        let span = tracing::span!(Level::INFO, "sweep", %phase);
        span.pb_set_style(&PROGRESS_STYLE);
        span.pb_set_length(order.len() as u64);
        span.pb_set_message(&format!("{phase}..."));
        let _enter = span.enter();

        for &index in order {
            let children: Vec<TaskKey> = self
                .tasks
                .node(index)
                .children
                .iter()
                .map(|&child| self.tasks.node(child).key.clone())
                .collect();

            let node = self.tasks.node_mut(index);
            let key = &node.key;
            let task = &mut node.task;
            let mut ctx = TaskContext {
                phase,
                batch_id,
                key,
                children: &children,
                root: &self.config.root,
                ledger: &mut *ledger,
                db: &mut *database,
            };

            tracing::trace!("{phase} '{key}'");
            task.invoke(&mut ctx).map_err(|source| PluginError::Task {
                key: key.clone(),
                category: key.category().to_string(),
                phase,
                source,
            })?;

            span.pb_inc(1);
        }

        tracing::info!(
            "finished {phase} {} tasks in {}ms",
            order.len(),
            s.elapsed().as_millis()
        );
        Ok(())
    }

    /// Roots whose key starts with the configured target, or all of them.
    pub fn select_roots(&self) -> Vec<NodeIndex> {
        let target = self.config.target.as_deref().filter(|t| !t.is_empty());

        let Some(target) = target else {
            tracing::debug!("no target, running all {} roots", self.roots.len());
            return self.roots.clone();
        };

        let selected: Vec<NodeIndex> = self
            .roots
            .iter()
            .copied()
            .filter(|&index| self.tasks.node(index).key.as_str().starts_with(target))
            .collect();

        tracing::debug!(
            "target '{target}' selected {:?}",
            selected
                .iter()
                .map(|&index| self.tasks.node(index).key.as_str())
                .collect::<Vec<_>>()
        );
        selected
    }

    /// Opens the backend to inspect a past batch, the latest one by default.
    pub fn setup_read(&mut self, batch_id: Option<u64>) -> Result<u64, QuireError> {
        let database = self.registry.open_database(&self.config)?;

        let id = match batch_id {
            Some(id) => id,
            None => database
                .max_batch_id()
                .map_err(|source| self.database_error(source))?,
        };

        self.database = Some(database);
        self.batch = Some(Batch::new(id));
        Ok(id)
    }

    pub fn child_hashes_in_previous_batch(
        &self,
        fingerprint: &str,
    ) -> Result<BTreeSet<String>, QuireError> {
        let (Some(database), Some(batch)) = (&self.database, &self.batch) else {
            return Err(InternalError::NoDatabase.into());
        };

        let hashes = database
            .get_child_hashes_in_previous_batch(batch.id, fingerprint)
            .map_err(|source| self.database_error(source))?;

        Ok(hashes)
    }

    /// Materialized tasks of a category, under any of its aliases.
    pub fn tasks_in_category(&self, category: &str) -> Vec<&TaskKey> {
        let Some(category) = self.registry.standardize(category) else {
            return Vec::new();
        };

        self.tasks
            .indices()
            .map(|index| &self.tasks.node(index).key)
            .filter(|key| key.category() == category)
            .collect()
    }

    /// Indented outline of the batch, its roots and their descendants.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        match &self.batch {
            Some(batch) => {
                let _ = writeln!(out, "batch {}", batch.id);
            }
            None => out.push_str("batch -\n"),
        }

        let mut stack: Vec<(NodeIndex, usize)> =
            self.roots.iter().rev().map(|&root| (root, 1)).collect();

        while let Some((index, depth)) = stack.pop() {
            let node = self.tasks.node(index);
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), node.key);
            stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
        }

        out
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    /// Graphviz export of the task graph of the last completed run.
    pub fn graph(&self) -> Option<&str> {
        self.graph.as_deref()
    }

    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    pub fn tasks(&self) -> &TaskGraph {
        &self.tasks
    }

    pub fn database(&self) -> Option<&dyn Database> {
        self.database.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::database::{JsonDatabase, MemoryDatabase, TaskRecord};
    use crate::task::{Task, TaskSpec};

    type Journal = Arc<Mutex<Vec<(Phase, String)>>>;

    struct Recorder {
        key: TaskKey,
        journal: Journal,
    }

    impl Task for Recorder {
        fn invoke(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()> {
            if let Ok(mut journal) = self.journal.lock() {
                journal.push((ctx.phase, self.key.to_string()));
            }
            Ok(())
        }
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn recording_project(config: RunConfig) -> (Project, Journal) {
        let journal = Journal::default();
        let mut registry = Registry::builtin();
        let sink = journal.clone();
        registry
            .register_category(
                &["rec"],
                move |spec: TaskSpec| -> anyhow::Result<Box<dyn Task>> {
                    Ok(Box::new(Recorder {
                        key: spec.key,
                        journal: sink.clone(),
                    }))
                },
            )
            .unwrap();

        let config = config.with_db_alias("memory").with_silent(true);
        (Project::with_registry(config, registry), journal)
    }

    #[test]
    fn test_three_sweeps_exactly_once() {
        let (_dir, root) = tempdir();
        let (mut project, journal) = recording_project(RunConfig::default().with_root(root));

        let batch = project.run_keys(&["rec:one", "rec:two"]).unwrap();
        assert_eq!(batch.id, 1);
        assert!(batch.elapsed.is_some());
        assert_eq!(project.state(), RunState::Complete);

        let journal = journal.lock().unwrap();
        let expected: Vec<(Phase, String)> = Phase::ALL
            .iter()
            .flat_map(|&phase| {
                [
                    (phase, "rec:one".to_string()),
                    (phase, "rec:two".to_string()),
                ]
            })
            .collect();
        assert_eq!(*journal, expected);
    }

    #[test]
    fn test_target_filter() {
        let (_dir, root) = tempdir();
        let config = RunConfig::default()
            .with_root(root)
            .with_target("rec:src/");
        let (mut project, journal) = recording_project(config);

        project
            .run_keys(&["rec:src/a.txt", "rec:other/b.txt"])
            .unwrap();

        let journal = journal.lock().unwrap();
        assert_eq!(journal.len(), 3);
        assert!(journal.iter().all(|(_, key)| key == "rec:src/a.txt"));
        assert!(project.tasks().find("rec:other/b.txt").is_some());
    }

    #[test]
    fn test_missing_dirs() {
        let (_dir, root) = tempdir();
        let mut project = Project::new(RunConfig::default().with_root(root).with_silent(true));

        assert!(matches!(
            project.run(),
            Err(QuireError::Config(ConfigError::MissingDirectories { .. }))
        ));
        assert_eq!(project.state(), RunState::Idle);
    }

    #[test]
    fn test_failed_task_aborts_run() {
        let (_dir, root) = tempdir();
        let mut project = Project::new(
            RunConfig::default()
                .with_root(root)
                .with_db_alias("memory")
                .with_silent(true),
        );

        let err = project.run_keys(&["doc:nowhere.txt"]).unwrap_err();
        assert!(matches!(
            err,
            QuireError::Plugin(PluginError::Task { phase: Phase::Populating, .. })
        ));
        assert_eq!(project.state(), RunState::Populating);
        assert!(project.database().is_some());
        assert!(project.graph().is_none());
    }

    #[test]
    fn test_aborted_batch_is_saved() {
        let (_dir, root) = tempdir();
        let config = RunConfig::default().with_root(root.clone()).with_silent(true);
        fs::write(root.join("a.txt"), "alpha").unwrap();

        let mut first = Project::new(config.clone());
        assert!(first.run_keys(&["doc:nowhere.txt"]).is_err());

        let db = JsonDatabase::open(config.db_path()).unwrap();
        assert_eq!(db.max_batch_id().unwrap(), 1);

        let mut second = Project::new(config);
        assert_eq!(second.run_keys(&["doc:a.txt"]).unwrap().id, 2);
    }

    struct Unwritable(MemoryDatabase);

    impl Database for Unwritable {
        fn next_batch_id(&mut self) -> anyhow::Result<u64> {
            self.0.next_batch_id()
        }

        fn max_batch_id(&self) -> anyhow::Result<u64> {
            self.0.max_batch_id()
        }

        fn record(&mut self, record: TaskRecord) -> anyhow::Result<()> {
            self.0.record(record)
        }

        fn save(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("read-only store")
        }

        fn get_child_hashes_in_previous_batch(
            &self,
            batch_id: u64,
            parent: &str,
        ) -> anyhow::Result<BTreeSet<String>> {
            self.0.get_child_hashes_in_previous_batch(batch_id, parent)
        }
    }

    #[test]
    fn test_failed_save_keeps_backend() {
        let (_dir, root) = tempdir();
        let mut registry = Registry::builtin();
        registry
            .register_database("unwritable", |_: &RunConfig| {
                Ok(Box::new(Unwritable(MemoryDatabase::new())) as Box<dyn Database>)
            })
            .unwrap();

        let config = RunConfig::default()
            .with_root(root)
            .with_db_alias("unwritable")
            .with_silent(true);
        let mut project = Project::with_registry(config, registry);

        let err = project.run_keys(&["bundle:site"]).unwrap_err();
        assert!(matches!(err, QuireError::Plugin(PluginError::Database { .. })));
        assert_eq!(project.database().unwrap().max_batch_id().unwrap(), 1);
        assert!(project.graph().is_none());
    }

    #[test]
    fn test_pipeline_over_project_tree() {
        let (_dir, root) = tempdir();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("skip/deeper")).unwrap();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::write(root.join("sub/b.md"), "beta").unwrap();
        fs::write(root.join("quire.json"), r#"{"site": ["a.txt", ".md"]}"#).unwrap();
        fs::write(root.join("sub/quire.txt"), "b.md\n").unwrap();
        fs::write(root.join("skip/.noquire"), "").unwrap();
        fs::write(root.join("skip/deeper/quire.txt"), "hidden\n").unwrap();

        let config = RunConfig::default().with_root(root.clone()).with_silent(true);

        let mut project = Project::new(config.clone());
        project.setup_dirs().unwrap();

        let fragments = project.config_for_directory("sub").unwrap();
        let paths: Vec<&str> = fragments.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["quire.json", "sub/quire.txt"]);

        let batch = project.run().unwrap();
        assert_eq!(batch.id, 1);

        let roots: Vec<&str> = project
            .roots()
            .iter()
            .map(|&index| project.tasks().node(index).key.as_str())
            .collect();
        assert_eq!(roots, vec!["bundle:site", "doc:sub/b.md"]);
        assert!(project.tasks().find("bundle:hidden").is_none());

        let docs: Vec<&str> = project
            .tasks_in_category("file")
            .into_iter()
            .map(TaskKey::as_str)
            .collect();
        assert_eq!(docs, vec!["doc:a.txt", "doc:sub/b.md"]);

        assert_eq!(
            project.render_tree(),
            "batch 1\n  bundle:site\n    doc:a.txt\n    pattern:*.md\n  doc:sub/b.md\n"
        );
        assert!(project.graph().unwrap().starts_with("digraph G {"));

        // a fresh project sees the previous batch
        let mut again = Project::new(config.clone());
        assert_eq!(again.setup_read(None).unwrap(), 1);
        assert_eq!(again.run().unwrap().id, 2);

        let db = JsonDatabase::open(config.db_path()).unwrap();
        let second: Vec<_> = db
            .records()
            .tasks
            .iter()
            .filter(|task| task.batch_id == 2)
            .collect();
        assert_eq!(second.len(), 4);

        // identical inputs give identical fingerprints across batches
        let site = |batch: u64| {
            db.records()
                .tasks
                .iter()
                .find(|task| task.batch_id == batch && task.key == "bundle:site")
                .map(|task| task.fingerprint.clone())
        };
        assert_eq!(site(1), site(2));

        let fingerprint = site(2).unwrap();
        let previous = again.child_hashes_in_previous_batch(&fingerprint).unwrap();
        assert_eq!(previous.len(), 2);

        assert!(fs::read_to_string(config.log_path()).unwrap().contains("batch 2"));
    }
}
