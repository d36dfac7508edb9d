//! Cache backends keeping batch numbers and task fingerprints between runs.

mod json;
mod memory;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use json::JsonDatabase;
pub use memory::MemoryDatabase;

/// A batch allocated by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: u64,
    /// Seconds since the Unix epoch.
    pub started: u64,
}

/// Fingerprint of a task as seen in one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub batch_id: u64,
    pub key: String,
    pub fingerprint: String,
    /// Fingerprints of the task's children, in child order.
    pub children: Vec<String>,
}

/// Storage for batch numbers and task records.
pub trait Database {
    /// Allocates and returns a new batch id, one past the highest known.
    fn next_batch_id(&mut self) -> anyhow::Result<u64>;

    /// Highest allocated batch id, `0` when no batch ran yet.
    fn max_batch_id(&self) -> anyhow::Result<u64>;

    fn record(&mut self, record: TaskRecord) -> anyhow::Result<()>;

    /// Persists everything recorded so far.
    fn save(&mut self) -> anyhow::Result<()>;

    /// Fingerprints of the children recorded under `parent` in the most
    /// recent batch older than `batch_id`.
    fn get_child_hashes_in_previous_batch(
        &self,
        batch_id: u64,
        parent: &str,
    ) -> anyhow::Result<BTreeSet<String>>;
}

/// In-memory contents shared by the builtin backends.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Records {
    pub batches: Vec<BatchRecord>,
    pub tasks: Vec<TaskRecord>,
}

impl Records {
    fn max_batch_id(&self) -> u64 {
        self.batches.iter().map(|batch| batch.id).max().unwrap_or(0)
    }

    fn allocate(&mut self) -> u64 {
        let id = self.max_batch_id() + 1;
        let started = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        self.batches.push(BatchRecord { id, started });
        id
    }

    fn child_hashes(&self, batch_id: u64, parent: &str) -> BTreeSet<String> {
        let previous = self
            .tasks
            .iter()
            .map(|task| task.batch_id)
            .filter(|&id| id < batch_id)
            .max();

        let Some(previous) = previous else {
            return BTreeSet::new();
        };

        self.tasks
            .iter()
            .filter(|task| task.batch_id == previous && task.fingerprint == parent)
            .flat_map(|task| task.children.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(batch_id: u64, fingerprint: &str, children: &[&str]) -> TaskRecord {
        TaskRecord {
            batch_id,
            key: "doc:a.txt".into(),
            fingerprint: fingerprint.into(),
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_allocate_is_monotonic() {
        let mut records = Records::default();
        assert_eq!(records.max_batch_id(), 0);
        assert_eq!(records.allocate(), 1);
        assert_eq!(records.allocate(), 2);
        assert_eq!(records.max_batch_id(), 2);
    }

    #[test]
    fn test_child_hashes_use_latest_older_batch() {
        let mut records = Records::default();
        records.tasks.push(record(1, "p", &["old"]));
        records.tasks.push(record(3, "p", &["c1", "c2"]));
        records.tasks.push(record(3, "q", &["other"]));
        records.tasks.push(record(4, "p", &["current"]));

        let hashes = records.child_hashes(4, "p");
        assert_eq!(
            hashes.into_iter().collect::<Vec<_>>(),
            vec!["c1".to_string(), "c2".to_string()]
        );

        assert!(records.child_hashes(1, "p").is_empty());
        assert!(records.child_hashes(4, "missing").is_empty());
    }
}
