use log::debug;
use rusqlite::Connection;

use crate::differ::classify;
use crate::error::SyncError;
use crate::mapper::ColumnMapping;
use crate::model::{Batch, RunContext};
use crate::reclaim::ReclaimPolicy;
use crate::schema::{bookkeeping, Action, TableSchema};
use crate::store;

/// Apply one resolved batch: fetch, classify, then updates, inserts and
/// (under [`ReclaimPolicy::Stale`]) the checked-at touch of unchanged rows.
pub fn apply_batch(
    conn: &Connection,
    schema: &TableSchema,
    mapping: &ColumnMapping,
    batch: Batch,
    ctx: &mut RunContext,
    policy: ReclaimPolicy,
) -> Result<(), SyncError> {
    if batch.is_empty() {
        return Ok(());
    }

    let fields = mapping.field_names();
    let keys: Vec<&str> = batch.keys().collect();
    let existing = store::fetch_existing(conn, schema, &fields, &keys)?;
    let changes = classify(&fields, &existing, batch);

    let stamp = ctx.stamp().to_string();
    let updated = store::update_rows(conn, schema, &changes.updates, &bookkeeping(Action::Update, &stamp, false))?;
    let inserted = store::insert_rows(
        conn,
        schema,
        &fields,
        &changes.inserts,
        &bookkeeping(Action::Insert, &stamp, false),
    )?;
    if policy == ReclaimPolicy::Stale {
        store::touch_rows(conn, schema, &changes.unchanged, &stamp)?;
    }

    ctx.counts.updated += updated;
    ctx.counts.inserted += inserted;
    ctx.counts.unchanged += changes.unchanged.len();
    ctx.counts.chunks += 1;

    debug!(
        "chunk {}: {} inserted, {} updated, {} unchanged",
        ctx.counts.chunks,
        inserted,
        updated,
        changes.unchanged.len()
    );
    Ok(())
}
