use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use serde::Serialize;

use crate::dictionary::DictionaryStore;
use crate::reclaim::ReclaimPolicy;

/// Storage timestamp format for the bookkeeping columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Resolved source rows keyed by natural key. Values are aligned with
/// [`ColumnMapping::columns`](crate::mapper::ColumnMapping::columns).
#[derive(Debug, Default)]
pub struct Batch {
    rows: BTreeMap<String, Vec<Value>>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier values for `key`.
    pub fn insert(&mut self, key: String, values: Vec<Value>) {
        self.rows.insert(key, values);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&[Value]> {
        self.rows.get(key).map(Vec::as_slice)
    }
}

impl IntoIterator for Batch {
    type Item = (String, Vec<Value>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Vec<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub key: String,
    /// Only the fields whose value differs from storage.
    pub changes: Vec<(&'static str, Value)>,
}

/// Classification of one batch against storage.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub updates: Vec<RowUpdate>,
    pub inserts: Vec<(String, Vec<Value>)>,
    pub unchanged: Vec<String>,
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Non-blank data rows read from the source.
    pub rows_read: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows without a natural key.
    pub skipped: usize,
    /// Rows whose key already appeared earlier in the source.
    pub duplicates: usize,
    pub deleted: usize,
    pub chunks: usize,
}

/// Ephemeral state of one reconciliation run.
#[derive(Debug)]
pub struct RunContext {
    started_at: NaiveDateTime,
    stamp: String,
    pub dictionaries: DictionaryStore,
    observed: HashSet<String>,
    pub counts: RunCounts,
}

impl RunContext {
    pub fn new(started_at: NaiveDateTime) -> Self {
        Self {
            started_at,
            stamp: started_at.format(TIMESTAMP_FORMAT).to_string(),
            dictionaries: DictionaryStore::new(),
            observed: HashSet::new(),
            counts: RunCounts::default(),
        }
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    /// Run start formatted for the bookkeeping columns.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub fn observe(&mut self, key: &str) {
        if !self.observed.contains(key) {
            self.observed.insert(key.to_string());
        }
    }

    pub fn was_observed(&self, key: &str) -> bool {
        self.observed.contains(key)
    }

    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub table: String,
    pub reclaim: ReclaimPolicy,
    pub started_at: String,
    pub finished_at: String,
    pub header_row: usize,
    pub first_data_row: usize,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub dictionary_entries_added: usize,
    pub unmapped_columns: Vec<String>,
}

impl SyncReport {
    /// Rows written or removed by the run.
    pub fn changes(&self) -> usize {
        self.counts.inserted + self.counts.updated + self.counts.deleted
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows read: {} inserted, {} updated, {} unchanged, {} skipped, {} duplicate keys, {} deleted ({} chunks, {} new dictionary entries)",
            self.counts.rows_read,
            self.counts.inserted,
            self.counts.updated,
            self.counts.unchanged,
            self.counts.skipped,
            self.counts.duplicates,
            self.counts.deleted,
            self.counts.chunks,
            self.dictionary_entries_added,
        )
    }
}
