//! Dictionary store: free-text labels → stable surrogate ids.
//!
//! Each category is read once into memory and grown on miss. Labels match
//! exactly (case-sensitive). The read-then-insert sequence assumes a single
//! writer per table; concurrent runs can create duplicate labels.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::debug;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::SyncError;
use crate::schema::quote_ident;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictionaryEntry {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Default)]
struct Dictionary {
    ids: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct DictionaryStore {
    dictionaries: HashMap<&'static str, Dictionary>,
    added: usize,
}

impl DictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries of `category`, ordered by id.
    pub fn load(conn: &Connection, category: &str) -> Result<Vec<DictionaryEntry>, SyncError> {
        let sql = format!("SELECT \"id\", \"value\" FROM {} ORDER BY \"id\"", quote_ident(category));
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(DictionaryEntry {
                    id: row.get(0)?,
                    label: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Bulk-load every category into the cache.
    pub fn preload(&mut self, conn: &Connection, categories: &[&'static str]) -> Result<(), SyncError> {
        for category in categories {
            self.ensure_loaded(conn, *category)?;
        }
        Ok(())
    }

    fn ensure_loaded(&mut self, conn: &Connection, category: &'static str) -> Result<&mut Dictionary, SyncError> {
        match self.dictionaries.entry(category) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let mut dictionary = Dictionary::default();
                for entry in Self::load(conn, category)? {
                    // Duplicate labels in storage: lowest id wins.
                    dictionary.ids.entry(entry.label).or_insert(entry.id);
                }
                debug!("dictionary '{category}': {} entries loaded", dictionary.ids.len());
                Ok(slot.insert(dictionary))
            }
        }
    }

    /// Id for `label`, appending a new entry to storage and cache on miss.
    pub fn resolve(&mut self, conn: &Connection, category: &'static str, label: &str) -> Result<i64, SyncError> {
        let dictionary = self.ensure_loaded(conn, category)?;
        if let Some(&id) = dictionary.ids.get(label) {
            return Ok(id);
        }

        conn.execute(
            &format!("INSERT INTO {} (\"value\") VALUES (?1)", quote_ident(category)),
            params![label],
        )?;
        let id = conn.last_insert_rowid();
        dictionary.ids.insert(label.to_string(), id);
        self.added += 1;
        Ok(id)
    }

    /// Cached id without touching storage.
    pub fn get(&self, category: &str, label: &str) -> Option<i64> {
        self.dictionaries.get(category)?.ids.get(label).copied()
    }

    /// Number of entries appended since this store was created.
    pub fn added(&self) -> usize {
        self.added
    }
}
