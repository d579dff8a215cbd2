use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::Connection;

use crate::dictionary::DictionaryStore;
use crate::error::SyncError;
use crate::mapper::{is_blank, ColumnMapping};
use crate::model::{Batch, ChangeSet, RowUpdate, RunContext};
use crate::schema::TableSchema;
use crate::value::{normalize_cell, same_value};

/// Turns source rows into resolved batch entries.
pub struct RowDiffer<'a> {
    schema: &'a TableSchema,
    mapping: &'a ColumnMapping,
}

impl<'a> RowDiffer<'a> {
    pub fn new(schema: &'a TableSchema, mapping: &'a ColumnMapping) -> Self {
        Self { schema, mapping }
    }

    /// Natural key of a data row, normalized. `None` when the key cell is empty.
    pub fn key_of(&self, row: &[String]) -> Option<String> {
        let raw = row.get(self.mapping.key.position).map(String::as_str).unwrap_or("");
        let key = normalize_cell(self.mapping.key.field.storage, raw);
        (!key.is_empty()).then_some(key)
    }

    /// Resolve the non-key cells of a row, in mapping order.
    ///
    /// Dictionary-backed cells are replaced by their surrogate id so the
    /// later diff compares ids with ids.
    pub fn resolve_values(
        &self,
        conn: &Connection,
        row: &[String],
        dictionaries: &mut DictionaryStore,
    ) -> Result<Vec<Value>, SyncError> {
        let mut values = Vec::with_capacity(self.mapping.columns.len());
        for column in &self.mapping.columns {
            let raw = row.get(column.position).map(String::as_str).unwrap_or("");
            let value = match column.field.dictionary {
                Some(category) => Value::Integer(dictionaries.resolve(conn, category, raw)?),
                None => Value::Text(normalize_cell(column.field.storage, raw)),
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Key and resolved values of one data row. `None` when the key cell is empty.
    pub fn resolve_row(
        &self,
        conn: &Connection,
        row: &[String],
        dictionaries: &mut DictionaryStore,
    ) -> Result<Option<(String, Vec<Value>)>, SyncError> {
        match self.key_of(row) {
            Some(key) => Ok(Some((key, self.resolve_values(conn, row, dictionaries)?))),
            None => Ok(None),
        }
    }

    /// Pull rows until the batch holds `chunk_size` keys or the source ends.
    ///
    /// The first row seen for a key wins for the whole run: later rows with
    /// the same key are counted as duplicates and never resolved, whatever
    /// chunk they fall in. An empty batch means the source is exhausted.
    pub fn fill_batch<I>(
        &self,
        conn: &Connection,
        rows: &mut I,
        ctx: &mut RunContext,
        chunk_size: usize,
    ) -> Result<Batch, SyncError>
    where
        I: Iterator<Item = Vec<String>>,
    {
        let mut batch = Batch::new();
        while batch.len() < chunk_size {
            let Some(row) = rows.next() else { break };
            if is_blank(&row) {
                continue;
            }
            ctx.counts.rows_read += 1;

            let Some(key) = self.key_of(&row) else {
                ctx.counts.skipped += 1;
                continue;
            };
            if ctx.was_observed(&key) {
                log::debug!("{}: key '{key}' repeated, keeping its first row", self.schema.table);
                ctx.counts.duplicates += 1;
                continue;
            }

            let values = self.resolve_values(conn, &row, &mut ctx.dictionaries)?;
            ctx.observe(&key);
            batch.insert(key, values);
        }
        log::trace!("{}: batch of {} keys", self.schema.table, batch.len());
        Ok(batch)
    }
}

/// Split a batch into updates (changed fields only), inserts and unchanged keys.
///
/// `fields` names the batch value positions; `existing` holds the stored
/// values for the same positions.
pub fn classify(fields: &[&'static str], existing: &HashMap<String, Vec<Value>>, batch: Batch) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (key, values) in batch {
        match existing.get(&key) {
            Some(stored) => {
                let diff: Vec<(&'static str, Value)> = fields
                    .iter()
                    .zip(stored.iter().zip(values))
                    .filter(|(_, (old, new))| !same_value(old, new))
                    .map(|(field, (_, new))| (*field, new))
                    .collect();
                if diff.is_empty() {
                    changes.unchanged.push(key);
                } else {
                    changes.updates.push(RowUpdate { key, changes: diff });
                }
            }
            None => changes.inserts.push((key, values)),
        }
    }
    changes
}
