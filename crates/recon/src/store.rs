//! Batched statement builders for the destination table.
//!
//! Each operation issues one statement per chunk. A statement is split only
//! when it would exceed SQLite's bound-parameter limit.

use std::collections::HashMap;

use log::debug;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::error::SyncError;
use crate::model::RowUpdate;
use crate::schema::{quote_ident, TableSchema, CHECKED_AT, CREATED_MANUAL};
use crate::value::canonical_text;

/// SQLITE_MAX_VARIABLE_NUMBER of the bundled SQLite.
pub const MAX_PARAMS: usize = 32_766;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Stored values of `fields` for every key in `keys` that exists.
pub fn fetch_existing(
    conn: &Connection,
    schema: &TableSchema,
    fields: &[&str],
    keys: &[&str],
) -> Result<HashMap<String, Vec<Value>>, SyncError> {
    let key_col = quote_ident(schema.key);
    let mut select = vec![key_col.clone()];
    select.extend(fields.iter().map(|f| quote_ident(f)));
    let select = select.join(", ");

    let mut existing = HashMap::with_capacity(keys.len());
    for chunk in keys.chunks(MAX_PARAMS) {
        let sql = format!(
            "SELECT {select} FROM {} WHERE {key_col} IN ({})",
            quote_ident(schema.table),
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
        while let Some(row) = rows.next()? {
            let key = canonical_text(&row.get::<_, Value>(0)?);
            let values = (1..=fields.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()?;
            existing.insert(key, values);
        }
    }
    Ok(existing)
}

/// Multi-row INSERT of `rows` (key + `fields`) with the given bookkeeping values.
pub fn insert_rows(
    conn: &Connection,
    schema: &TableSchema,
    fields: &[&str],
    rows: &[(String, Vec<Value>)],
    bookkeeping: &[(&str, Value)],
) -> Result<usize, SyncError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut columns = vec![quote_ident(schema.key)];
    columns.extend(fields.iter().map(|f| quote_ident(f)));
    columns.extend(bookkeeping.iter().map(|(name, _)| quote_ident(name)));
    let per_row = columns.len();
    let row_placeholders = format!("({})", placeholders(per_row));
    let rows_per_statement = (MAX_PARAMS / per_row).max(1);

    let mut inserted = 0;
    for chunk in rows.chunks(rows_per_statement) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(schema.table),
            columns.join(", "),
            vec![row_placeholders.as_str(); chunk.len()].join(", ")
        );

        let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * per_row);
        for (key, values) in chunk {
            params.push(Value::Text(key.clone()));
            params.extend(values.iter().cloned());
            params.extend(bookkeeping.iter().map(|(_, v)| v.clone()));
        }

        inserted += conn.execute(&sql, params_from_iter(params.iter()))?;
    }

    debug!("{}: inserted {inserted} rows", schema.table);
    Ok(inserted)
}

/// One UPDATE per group of rows: each changed field becomes a
/// `CASE key WHEN ? THEN ? … ELSE field END` over the rows that changed it.
pub fn update_rows(
    conn: &Connection,
    schema: &TableSchema,
    updates: &[RowUpdate],
    bookkeeping: &[(&str, Value)],
) -> Result<usize, SyncError> {
    let mut updated = 0;
    for group in group_by_param_budget(updates, bookkeeping.len()) {
        updated += update_group(conn, schema, group, bookkeeping)?;
    }
    if updated > 0 {
        debug!("{}: updated {updated} rows", schema.table);
    }
    Ok(updated)
}

/// Split updates so each statement stays under [`MAX_PARAMS`].
fn group_by_param_budget(updates: &[RowUpdate], fixed: usize) -> Vec<&[RowUpdate]> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut cost = fixed;
    for (i, update) in updates.iter().enumerate() {
        let row_cost = update.changes.len() * 2 + 1;
        if i > start && cost + row_cost > MAX_PARAMS {
            groups.push(&updates[start..i]);
            start = i;
            cost = fixed;
        }
        cost += row_cost;
    }
    if start < updates.len() {
        groups.push(&updates[start..]);
    }
    groups
}

fn update_group(
    conn: &Connection,
    schema: &TableSchema,
    group: &[RowUpdate],
    bookkeeping: &[(&str, Value)],
) -> Result<usize, SyncError> {
    let key_col = quote_ident(schema.key);

    // Changed fields in order of first appearance.
    let mut fields: Vec<&str> = Vec::new();
    for update in group {
        for (field, _) in &update.changes {
            if !fields.contains(field) {
                fields.push(field);
            }
        }
    }

    let mut assignments = Vec::with_capacity(fields.len() + bookkeeping.len());
    let mut params: Vec<Value> = Vec::new();
    for field in &fields {
        let col = quote_ident(field);
        let mut case = format!("{col} = CASE {key_col}");
        for update in group {
            if let Some((_, value)) = update.changes.iter().find(|(f, _)| f == field) {
                case.push_str(" WHEN ? THEN ?");
                params.push(Value::Text(update.key.clone()));
                params.push(value.clone());
            }
        }
        case.push_str(&format!(" ELSE {col} END"));
        assignments.push(case);
    }
    for (name, value) in bookkeeping {
        assignments.push(format!("{} = ?", quote_ident(name)));
        params.push(value.clone());
    }
    params.extend(group.iter().map(|u| Value::Text(u.key.clone())));

    let sql = format!(
        "UPDATE {} SET {} WHERE {key_col} IN ({})",
        quote_ident(schema.table),
        assignments.join(", "),
        placeholders(group.len())
    );
    Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
}

/// Set `checked_at` on rows observed unchanged.
pub fn touch_rows(conn: &Connection, schema: &TableSchema, keys: &[String], stamp: &str) -> Result<usize, SyncError> {
    let mut touched = 0;
    for chunk in keys.chunks(MAX_PARAMS - 1) {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} IN ({})",
            quote_ident(schema.table),
            quote_ident(CHECKED_AT),
            quote_ident(schema.key),
            placeholders(chunk.len())
        );
        let params = std::iter::once(stamp).chain(chunk.iter().map(String::as_str));
        touched += conn.execute(&sql, params_from_iter(params))?;
    }
    Ok(touched)
}

/// Every natural key currently stored.
pub fn all_keys(conn: &Connection, schema: &TableSchema) -> Result<Vec<String>, SyncError> {
    let sql = format!("SELECT {} FROM {}", quote_ident(schema.key), quote_ident(schema.table));
    let mut stmt = conn.prepare(&sql)?;
    let keys = stmt
        .query_map([], |row| row.get::<_, Value>(0))?
        .map(|v| v.map(|v| canonical_text(&v)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

/// Delete `keys`, leaving manually created rows in place.
pub fn delete_unprotected(conn: &Connection, schema: &TableSchema, keys: &[&str]) -> Result<usize, SyncError> {
    let mut deleted = 0;
    for chunk in keys.chunks(MAX_PARAMS) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({}) AND {} = 0",
            quote_ident(schema.table),
            quote_ident(schema.key),
            placeholders(chunk.len()),
            quote_ident(CREATED_MANUAL)
        );
        deleted += conn.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(deleted)
}

/// Delete non-manual rows not checked since `before`.
pub fn delete_stale(conn: &Connection, schema: &TableSchema, before: &str) -> Result<usize, SyncError> {
    let checked = quote_ident(CHECKED_AT);
    let sql = format!(
        "DELETE FROM {} WHERE ({checked} IS NULL OR {checked} < ?1) AND {} = 0",
        quote_ident(schema.table),
        quote_ident(CREATED_MANUAL)
    );
    Ok(conn.execute(&sql, [before])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{bookkeeping, Action, FieldDescriptor};

    const FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::code("code", 5).label("Code"),
        FieldDescriptor::text("name").label("Name"),
        FieldDescriptor::text("city").label("City"),
    ];
    const SCHEMA: TableSchema = TableSchema { table: "offices", key: "code", fields: FIELDS };

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMA.ensure_tables(&conn).unwrap();
        conn
    }

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    fn row(key: &str, name: &str, city: &str) -> (String, Vec<Value>) {
        (key.into(), vec![text(name), text(city)])
    }

    #[test]
    fn insert_then_fetch() {
        let conn = conn();
        let bk = bookkeeping(Action::Insert, "2026-01-01 00:00:00", false);
        let n = insert_rows(&conn, &SCHEMA, &["name", "city"], &[row("00001", "A", "Kyiv"), row("00002", "B", "Lviv")], &bk)
            .unwrap();
        assert_eq!(n, 2);

        let existing = fetch_existing(&conn, &SCHEMA, &["city"], &["00002", "00009"]).unwrap();
        assert_eq!(existing.len(), 1);
        assert_eq!(existing["00002"], vec![text("Lviv")]);
    }

    #[test]
    fn update_touches_only_changed_fields() {
        let conn = conn();
        let bk = bookkeeping(Action::Insert, "2026-01-01 00:00:00", false);
        insert_rows(&conn, &SCHEMA, &["name", "city"], &[row("00001", "A", "Kyiv"), row("00002", "B", "Lviv")], &bk)
            .unwrap();

        let updates = vec![
            RowUpdate { key: "00001".into(), changes: vec![("city", text("Odesa"))] },
            RowUpdate { key: "00002".into(), changes: vec![("name", text("BB"))] },
        ];
        let bk = bookkeeping(Action::Update, "2026-01-02 00:00:00", false);
        assert_eq!(update_rows(&conn, &SCHEMA, &updates, &bk).unwrap(), 2);

        let existing = fetch_existing(&conn, &SCHEMA, &["name", "city", "updated_at"], &["00001", "00002"]).unwrap();
        assert_eq!(existing["00001"], vec![text("A"), text("Odesa"), text("2026-01-02 00:00:00")]);
        assert_eq!(existing["00002"], vec![text("BB"), text("Lviv"), text("2026-01-02 00:00:00")]);
    }

    #[test]
    fn updates_split_under_param_limit() {
        let updates: Vec<RowUpdate> = (0..20_000)
            .map(|i| RowUpdate { key: format!("{i:05}"), changes: vec![("name", text("x"))] })
            .collect();
        let groups = group_by_param_budget(&updates, 2);
        assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), 20_000);
        assert!(groups.len() > 1);
        for g in &groups {
            assert!(g.len() * 3 + 2 <= MAX_PARAMS);
        }
    }

    #[test]
    fn delete_spares_manual_rows() {
        let conn = conn();
        let bk = bookkeeping(Action::Insert, "2026-01-01 00:00:00", false);
        insert_rows(&conn, &SCHEMA, &["name", "city"], &[row("00001", "A", "Kyiv")], &bk).unwrap();
        let bk = bookkeeping(Action::Insert, "2026-01-01 00:00:00", true);
        insert_rows(&conn, &SCHEMA, &["name", "city"], &[row("99999", "M", "Kyiv")], &bk).unwrap();

        assert_eq!(delete_unprotected(&conn, &SCHEMA, &["00001", "99999"]).unwrap(), 1);
        assert_eq!(all_keys(&conn, &SCHEMA).unwrap(), vec!["99999".to_string()]);
    }

    #[test]
    fn stale_rows_are_deleted() {
        let conn = conn();
        let old = bookkeeping(Action::Insert, "2026-01-01 00:00:00", false);
        insert_rows(&conn, &SCHEMA, &["name", "city"], &[row("00001", "A", "Kyiv"), row("00002", "B", "Lviv")], &old)
            .unwrap();
        assert_eq!(touch_rows(&conn, &SCHEMA, &["00002".to_string()], "2026-02-01 00:00:00").unwrap(), 1);

        assert_eq!(delete_stale(&conn, &SCHEMA, "2026-02-01 00:00:00").unwrap(), 1);
        assert_eq!(all_keys(&conn, &SCHEMA).unwrap(), vec!["00002".to_string()]);
    }
}
