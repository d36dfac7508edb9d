//! The task plugin contract and the builtin task categories.
//!
//! A task is created once per canonical key by its category's
//! [`TaskFactory`] and then invoked exactly once per [`Phase`] of a batch.
//! Everything a task may touch during an invocation is handed to it through
//! a [`TaskContext`]; there is no ambient run state.

mod bundle;
mod doc;
mod pattern;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;

use crate::config::RunConfig;
use crate::database::{Database, TaskRecord};
use crate::hash::Hash32;
use crate::key::TaskKey;
use crate::tree::Options;

pub use bundle::BundleTask;
pub use doc::DocTask;
pub use pattern::PatternTask;

/// One of the global sweeps of a batch, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Populating,
    SettingUp,
    Running,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Populating, Phase::SettingUp, Phase::Running];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Populating => "populating",
            Phase::SettingUp => "setting up",
            Phase::Running => "running",
        })
    }
}

/// Everything a factory gets to build a task from.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub key: TaskKey,
    pub category: String,
    pub pattern: String,
    /// Keys of the surviving children, in recorded order.
    pub children: Vec<TaskKey>,
    pub options: Options,
    pub config: Arc<RunConfig>,
}

pub trait Task {
    /// Runs the task for the phase carried by `ctx`.
    fn invoke(&mut self, ctx: &mut TaskContext<'_>) -> anyhow::Result<()>;

    /// Labels of the sub-artifacts this task produces, if any.
    fn artifacts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Internal artifact-only units are left out of the graph export.
    fn is_artifact(&self) -> bool {
        false
    }
}

/// Builds tasks for one category.
pub trait TaskFactory: Send + Sync {
    fn create(&self, spec: TaskSpec) -> anyhow::Result<Box<dyn Task>>;
}

impl<F> TaskFactory for F
where
    F: Fn(TaskSpec) -> anyhow::Result<Box<dyn Task>> + Send + Sync,
{
    fn create(&self, spec: TaskSpec) -> anyhow::Result<Box<dyn Task>> {
        self(spec)
    }
}

pub fn builtin_doc(spec: TaskSpec) -> anyhow::Result<Box<dyn Task>> {
    Ok(Box::new(DocTask::new(spec)))
}

pub fn builtin_bundle(spec: TaskSpec) -> anyhow::Result<Box<dyn Task>> {
    Ok(Box::new(BundleTask::new(spec)))
}

pub fn builtin_pattern(spec: TaskSpec) -> anyhow::Result<Box<dyn Task>> {
    Ok(Box::new(PatternTask::new(spec)))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprints {
    /// Hash of the task's own inputs, known after populating.
    pub content: Option<Hash32>,
    /// Own content combined with the children's, known after setting up.
    pub combined: Option<Hash32>,
}

/// Fingerprints collected over the sweeps of a single batch.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: BTreeMap<TaskKey, Fingerprints>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Fingerprints> {
        self.entries.get(key)
    }

    fn entry(&mut self, key: &TaskKey) -> &mut Fingerprints {
        self.entries.entry(key.clone()).or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a task sees while it is being invoked.
pub struct TaskContext<'a> {
    pub phase: Phase,
    pub batch_id: u64,
    pub key: &'a TaskKey,
    pub children: &'a [TaskKey],
    /// Project root every pattern is relative to.
    pub root: &'a Utf8Path,
    pub(crate) ledger: &'a mut Ledger,
    pub(crate) db: &'a mut dyn Database,
}

impl TaskContext<'_> {
    pub fn set_content(&mut self, hash: Hash32) {
        self.ledger.entry(self.key).content = Some(hash);
    }

    pub fn fingerprints(&self, key: &TaskKey) -> Fingerprints {
        self.ledger.get(key).copied().unwrap_or_default()
    }

    /// Shared bookkeeping for the later phases: setting up folds the
    /// children's content into this task's fingerprint, running compares the
    /// children with the previous batch and records the task.
    pub fn settle(&mut self) -> anyhow::Result<()> {
        match self.phase {
            Phase::Populating => Ok(()),
            Phase::SettingUp => {
                let own = self.fingerprints(self.key).content.unwrap_or_default();
                let children = self
                    .children
                    .iter()
                    .filter_map(|child| self.fingerprints(child).content);

                let combined = Hash32::combine(std::iter::once(own).chain(children));
                self.ledger.entry(self.key).combined = Some(combined);
                Ok(())
            }
            Phase::Running => self.record(),
        }
    }

    fn record(&mut self) -> anyhow::Result<()> {
        let fingerprint = self
            .fingerprints(self.key)
            .combined
            .unwrap_or_default()
            .to_hex();

        let children: Vec<String> = self
            .children
            .iter()
            .filter_map(|child| self.fingerprints(child).combined)
            .map(Hash32::to_hex)
            .collect();

        if !children.is_empty() {
            let previous = self
                .db
                .get_child_hashes_in_previous_batch(self.batch_id, &fingerprint)?;
            let current: BTreeSet<String> = children.iter().cloned().collect();

            if previous == current {
                tracing::debug!(key = %self.key, "unchanged since the previous batch");
            } else {
                tracing::debug!(key = %self.key, "changed since the previous batch");
            }
        }

        self.db.record(TaskRecord {
            batch_id: self.batch_id,
            key: self.key.to_string(),
            fingerprint,
            children,
        })
    }
}
