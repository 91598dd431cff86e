//! Session-lifetime index of every record fetched so far.

use std::collections::HashMap;

use tracing::debug;

use crate::Record;

/// Outcome of a [`LocalIndex::merge`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Ids seen for the first time.
    pub inserted: usize,
    /// Ids that were already present and got overwritten.
    pub updated: usize,
    /// Overwrites that replaced a newer `updated_at` with an older one.
    pub regressed: usize,
}

/// Mapping from record id to its latest fetched metadata.
///
/// Entries are never removed. Merging the same id again overwrites it in
/// fetch-completion order, regardless of `updated_at`.
#[derive(Debug, Default, Clone)]
pub struct LocalIndex {
    records: HashMap<String, Record>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge<I>(&mut self, records: I) -> MergeStats
    where
        I: IntoIterator<Item = Record>,
    {
        let mut stats = MergeStats::default();
        for record in records {
            match self.records.insert(record.id.clone(), record) {
                None => stats.inserted += 1,
                Some(previous) => {
                    stats.updated += 1;
                    let current = &self.records[&previous.id];
                    if current.updated_at < previous.updated_at {
                        stats.regressed += 1;
                        debug!(
                            id = %previous.id,
                            was = %previous.updated_at,
                            now = %current.updated_at,
                            "record overwritten with older metadata"
                        );
                    }
                }
            }
        }
        stats
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}
