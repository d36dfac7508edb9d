//! The dependency tree accumulated while reading configuration fragments.
//!
//! Every key is stored in canonical form, so the same task reached through
//! different spellings shares one entry. The tree keeps a list of roots that
//! is re-filtered after every mutation: the moment a key is declared as
//! somebody's dependency it stops being a root, no matter which of the two
//! facts was discovered first.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde_json::Value;

use crate::error::{ConfigError, InternalError};
use crate::key::{Qualifier, TaskKey};

/// Options attached to a task, in declaration order.
pub type Options = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub options: Options,
    pub children: Vec<TaskKey>,
}

#[derive(Debug)]
pub struct DependencyTree {
    qualifier: Qualifier,
    roots: Vec<TaskKey>,
    entries: BTreeMap<TaskKey, Entry>,
}

impl DependencyTree {
    pub fn new(qualifier: Qualifier) -> Self {
        Self {
            qualifier,
            roots: Vec::new(),
            entries: BTreeMap::new(),
        }
    }

    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }

    /// Merges `options` into the entry for `key`, creating it as a root if it
    /// is new. Later values win for options with the same name.
    pub fn record_metadata(&mut self, key: &str, options: Options) -> Result<TaskKey, ConfigError> {
        let key = self.qualifier.canonicalize(key)?;

        if !self.roots.contains(&key) {
            self.roots.push(key.clone());
        }

        self.entries
            .entry(key.clone())
            .or_default()
            .options
            .extend(options);

        self.clean_roots();
        Ok(key)
    }

    /// Records `child` as a dependency of `parent`. Self edges are dropped.
    pub fn record_dependency(&mut self, parent: &str, child: &str) -> Result<(), ConfigError> {
        let parent = self.qualifier.canonicalize(parent)?;
        let child = self.qualifier.canonicalize(child)?;

        if parent == child {
            return Ok(());
        }

        if !self.roots.contains(&parent) {
            self.roots.push(parent.clone());
        }

        self.entries
            .entry(parent)
            .or_default()
            .children
            .push(child.clone());

        self.entries.entry(child).or_default();

        self.clean_roots();
        Ok(())
    }

    /// Drops every root which is already listed as someone's child.
    fn clean_roots(&mut self) {
        let children: HashSet<&TaskKey> = self
            .entries
            .values()
            .flat_map(|entry| &entry.children)
            .collect();

        self.roots.retain(|key| !children.contains(key));
    }

    pub fn metadata_of(&self, key: &TaskKey) -> Result<Options, InternalError> {
        self.entry(key).map(|entry| entry.options.clone())
    }

    pub fn children_of(&self, key: &TaskKey) -> Result<&[TaskKey], InternalError> {
        self.entry(key).map(|entry| entry.children.as_slice())
    }

    fn entry(&self, key: &TaskKey) -> Result<&Entry, InternalError> {
        self.entries
            .get(key)
            .ok_or_else(|| InternalError::UnknownKey(key.clone()))
    }

    pub fn roots(&self) -> &[TaskKey] {
        &self.roots
    }

    pub fn entries(&self) -> impl Iterator<Item = (&TaskKey, &Entry)> {
        self.entries.iter()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for DependencyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "roots:")?;
        for key in &self.roots {
            writeln!(f, "  {key}")?;
        }

        writeln!(f, "entries:")?;
        for (key, entry) in &self.entries {
            let children: Vec<_> = entry.children.iter().map(TaskKey::as_str).collect();
            writeln!(
                f,
                "  {key}: {} [{}]",
                Value::Object(entry.options.clone()),
                children.join(", ")
            )?;
        }

        Ok(())
    }
}
