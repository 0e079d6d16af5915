use std::collections::HashMap;
use std::collections::hash_map::Entry;

use progress_core::model::ProgressRecord;
use tracing::warn;

/// Coalescing buffer keyed by subject id.
///
/// Holds at most one record per subject. Every `add` folds the update into
/// the existing record with `ProgressRecord::merge_from`, so the buffer never
/// grows with the number of events, only with the number of subjects touched
/// since the last successful flush.
#[derive(Debug, Default)]
pub struct MergeBuffer {
    records: HashMap<String, ProgressRecord>,
}

impl MergeBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or merges a record. Records without a subject id are dropped.
    pub fn add(&mut self, mut record: ProgressRecord) {
        if let Err(err) = record.validate() {
            warn!(error = %err, "dropping malformed progress record");
            return;
        }
        record.normalize();
        match self.records.entry(record.subject_id.clone()) {
            Entry::Occupied(mut existing) => existing.get_mut().merge_from(record),
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    /// Removes and returns every buffered record.
    pub fn drain_all(&mut self) -> Vec<ProgressRecord> {
        self.records.drain().map(|(_, record)| record).collect()
    }

    /// Restores records from a failed flush.
    ///
    /// A record that arrived while the flush was in flight is newer than the
    /// restored snapshot, so it is merged on top of the snapshot rather than
    /// the other way round.
    pub fn reinsert(&mut self, records: Vec<ProgressRecord>) {
        for stale in records {
            if stale.validate().is_err() {
                continue;
            }
            match self.records.entry(stale.subject_id.clone()) {
                Entry::Occupied(mut existing) => {
                    let newer = std::mem::replace(existing.get_mut(), stale);
                    existing.get_mut().merge_from(newer);
                }
                Entry::Vacant(slot) => {
                    slot.insert(stale);
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, subject_id: &str) -> Option<&ProgressRecord> {
        self.records.get(subject_id)
    }
}
