use std::collections::BTreeSet;
use std::fs;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use super::{Database, Records, TaskRecord};

/// Backend persisting its records as a single JSON document.
#[derive(Debug)]
pub struct JsonDatabase {
    path: Utf8PathBuf,
    records: Records,
}

impl JsonDatabase {
    /// Opens the database at `path`, starting empty if the file is missing.
    pub fn open(path: impl AsRef<Utf8Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = if path.exists() {
            let text =
                fs::read_to_string(&path).with_context(|| format!("Couldn't read {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("Couldn't parse {path}"))?
        } else {
            Records::default()
        };

        Ok(Self { path, records })
    }

    pub fn records(&self) -> &Records {
        &self.records
    }
}

impl Database for JsonDatabase {
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
        let text = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, text).with_context(|| format!("Couldn't write {}", self.path))?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("db.json")).unwrap();

        let mut db = JsonDatabase::open(&path).unwrap();
        assert_eq!(db.max_batch_id().unwrap(), 0);
        let batch_id = db.next_batch_id().unwrap();
        db.record(TaskRecord {
            batch_id,
            key: "bundle:site".into(),
            fingerprint: "aa".into(),
            children: vec!["bb".into()],
        })
        .unwrap();
        db.save().unwrap();

        let mut db = JsonDatabase::open(&path).unwrap();
        assert_eq!(db.max_batch_id().unwrap(), 1);
        assert_eq!(db.next_batch_id().unwrap(), 2);

        let hashes = db.get_child_hashes_in_previous_batch(2, "aa").unwrap();
        assert!(hashes.contains("bb"));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("db.json")).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let err = JsonDatabase::open(&path).unwrap_err();
        assert!(err.to_string().contains("Couldn't parse"));
    }
}
