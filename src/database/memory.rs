use std::collections::BTreeSet;

use super::{Database, Records, TaskRecord};

/// Backend that forgets everything once dropped.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    records: Records,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &Records {
        &self.records
    }
}

impl Database for MemoryDatabase {
    fn next_batch_id(&mut self) -> anyhow::Result<u64> {
        Ok(self.records.allocate())
    }

    fn max_batch_id(&self) -> anyhow::Result<u64> {
        Ok(self.records.max_batch_id())
    }

    fn record(&mut self, record: TaskRecord) -> anyhow::Result<()> {
        self.records.tasks.push(record);
        Ok(())
    }

    fn save(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_child_hashes_in_previous_batch(
        &self,
        batch_id: u64,
        parent: &str,
    ) -> anyhow::Result<BTreeSet<String>> {
        Ok(self.records.child_hashes(batch_id, parent))
    }
}
