use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};

use super::records::HistoryRecord;
use super::storage::Storage;

/// Strictly increasing ids derived from wall-clock milliseconds.
///
/// Two ids issued within the same millisecond still differ because each id is
/// at least one more than the previous.
#[derive(Debug, Clone, Default)]
pub struct IdClock {
    last: u64,
}

impl IdClock {
    pub fn starting_after(last: u64) -> Self {
        Self { last }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = unix_millis().max(self.last.saturating_add(1));
        self.last = id;
        id
    }

    fn observe(&mut self, id: u64) {
        self.last = self.last.max(id);
    }
}

/// Newest-first list of records for one tool, mirrored to storage in full
/// after every mutation.
pub struct HistoryStore<R: HistoryRecord> {
    storage: Arc<dyn Storage>,
    records: Vec<R>,
    ids: IdClock,
    discarded_malformed: bool,
}

impl<R: HistoryRecord> HistoryStore<R> {
    /// Loads the persisted list. A missing entry is an empty history; an
    /// unreadable or malformed one is also treated as empty.
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let (records, discarded_malformed) = match storage.get(R::STORAGE_KEY) {
            Ok(None) => (Vec::new(), false),
            Ok(Some(raw)) => match serde_json::from_str::<Vec<R>>(&raw) {
                Ok(records) => (records, false),
                Err(_) => (Vec::new(), true),
            },
            Err(_) => (Vec::new(), true),
        };
        let last = records.iter().map(HistoryRecord::id).max().unwrap_or(0);
        Self {
            storage,
            records,
            ids: IdClock::starting_after(last),
            discarded_malformed,
        }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&R> {
        self.records.iter().find(|record| record.id() == id)
    }

    /// True when the last load found data it could not parse and started over.
    pub fn discarded_malformed(&self) -> bool {
        self.discarded_malformed
    }

    pub fn next_id(&mut self) -> u64 {
        self.ids.next_id()
    }

    /// Inserts at the head and persists the whole list. On a failed write the
    /// in-memory list is restored.
    pub fn append(&mut self, record: R) -> Result<()> {
        let id = record.id();
        if self.get(id).is_some() {
            bail!("history already contains a record with id {id}");
        }
        self.records.insert(0, record);
        if let Err(err) = self.persist() {
            self.records.remove(0);
            return Err(err);
        }
        self.ids.observe(id);
        self.discarded_malformed = false;
        Ok(())
    }

    /// Removes the record with `id`. Unknown ids are a no-op and do not write.
    pub fn delete(&mut self, id: u64) -> Result<Option<R>> {
        let Some(index) = self.records.iter().position(|record| record.id() == id) else {
            return Ok(None);
        };
        let removed = self.records.remove(index);
        if let Err(err) = self.persist() {
            self.records.insert(index, removed);
            return Err(err);
        }
        Ok(Some(removed))
    }

    fn persist(&self) -> Result<()> {
        let encoded = serde_json::to_string(&self.records)?;
        self.storage
            .set(R::STORAGE_KEY, &encoded)
            .with_context(|| format!("failed to persist {}", R::STORAGE_KEY))
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
