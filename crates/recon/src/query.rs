//! Query side: paged listing with address search, single-record lookup,
//! explicit deletion and manual insertion.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use log::info;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Map;

use crate::address::{self, address_fields, address_expression, dictionary_joins, label_column};
use crate::dictionary::DictionaryStore;
use crate::error::SyncError;
use crate::model::TIMESTAMP_FORMAT;
use crate::schema::{bookkeeping, quote_ident, Action, Language, StorageType, TableSchema, CREATED_MANUAL};
use crate::store;
use crate::translit::translit;
use crate::value::{normalize_cell, to_json};

pub type Record = Map<String, serde_json::Value>;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// `SELECT … FROM … LEFT JOIN …` projecting one record in `language`:
/// key, literal columns, dictionary labels (named by category), the
/// manual flag and the address string.
pub fn base_select(schema: &TableSchema, language: Language, separator: &str) -> String {
    let table = quote_ident(schema.table);
    let mut columns: Vec<String> = schema
        .fields_for(language)
        .map(|f| match f.dictionary {
            Some(category) => format!("{} AS {}", label_column(f), quote_ident(category)),
            None => format!("{table}.{}", quote_ident(f.name)),
        })
        .collect();
    columns.push(format!("{table}.{}", quote_ident(CREATED_MANUAL)));
    columns.push(format!("{} AS \"address\"", address_expression(schema, language, separator)));

    format!(
        "SELECT {} FROM {table}{}",
        columns.join(", "),
        dictionary_joins(schema, language)
    )
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    /// 1-based; pages past the end are clamped to the last page.
    pub page: usize,
    pub limit: usize,
    /// Substring matched against each address label.
    pub address: Option<String>,
    pub language: Language,
    pub separator: String,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            address: None,
            language: Language::default(),
            separator: address::DEFAULT_SEPARATOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub data: Vec<Record>,
    pub total_pages: usize,
    pub current_page: usize,
    pub total: usize,
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn row_to_record(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Record> {
    let mut record = Map::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        record.insert(name.clone(), to_json(&row.get::<_, Value>(i)?));
    }
    Ok(record)
}

fn collect_records(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Record>, SyncError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let records = stmt
        .query_map(params_from_iter(params.iter()), |row| row_to_record(row, &names))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn list(conn: &Connection, schema: &TableSchema, query: &ListQuery) -> Result<Page, SyncError> {
    if query.limit == 0 {
        return Err(SyncError::InvalidQuery("limit must be at least 1".into()));
    }

    let mut sql = base_select(schema, query.language, &query.separator);
    let mut params: Vec<Value> = Vec::new();
    let order = match query.address.as_deref().filter(|a| !a.is_empty()) {
        Some(needle) => {
            let fields = address_fields(schema, query.language);
            if !fields.is_empty() {
                let pattern = escape_like(needle);
                let conditions: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{} LIKE ? ESCAPE '\\'", label_column(f)))
                    .collect();
                params.extend(fields.iter().map(|_| Value::Text(pattern.clone())));
                sql.push_str(&format!(" WHERE ({})", conditions.join(" OR ")));
            }
            "\"address\"".to_string()
        }
        None => format!("{}.{}", quote_ident(schema.table), quote_ident(schema.key)),
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM ({sql})"),
        params_from_iter(params.iter()),
        |row| row.get(0),
    )?;
    let total = total as usize;
    let total_pages = total.div_ceil(query.limit);
    let current_page = query.page.max(1).min(total_pages.max(1));
    let offset = (current_page - 1) * query.limit;

    sql.push_str(&format!(" ORDER BY {order} LIMIT ? OFFSET ?"));
    params.push(Value::Integer(query.limit as i64));
    params.push(Value::Integer(offset as i64));

    Ok(Page {
        data: collect_records(conn, &sql, &params)?,
        total_pages,
        current_page,
        total,
    })
}

/// One record by natural key.
pub fn get(
    conn: &Connection,
    schema: &TableSchema,
    language: Language,
    separator: &str,
    key: &str,
) -> Result<Option<Record>, SyncError> {
    let key = normalized_key(schema, key)?;
    let sql = format!(
        "{} WHERE {}.{} = ?",
        base_select(schema, language, separator),
        quote_ident(schema.table),
        quote_ident(schema.key)
    );
    Ok(collect_records(conn, &sql, &[Value::Text(key)])?.into_iter().next())
}

/// Delete one record, manual or not. Returns whether a row was removed.
pub fn delete(conn: &Connection, schema: &TableSchema, key: &str) -> Result<bool, SyncError> {
    let key = normalized_key(schema, key)?;
    let removed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(schema.table),
            quote_ident(schema.key)
        ),
        [&key],
    )?;
    if removed > 0 {
        info!("{}: deleted '{key}'", schema.table);
    }
    Ok(removed > 0)
}

fn normalized_key(schema: &TableSchema, key: &str) -> Result<String, SyncError> {
    let field = schema.key_field()?;
    Ok(normalize_cell(field.storage, key))
}

/// Insert one record flagged `created_manual = 1`.
///
/// `input` is keyed by input name: the dictionary category for
/// dictionary-backed fields, the column name otherwise. Transliterated
/// fields not given explicitly are derived from their Ukrainian source;
/// dictionary fields still without a value resolve the empty label.
pub fn insert_manual(
    conn: &Connection,
    schema: &TableSchema,
    input: &BTreeMap<String, String>,
    now: NaiveDateTime,
) -> Result<String, SyncError> {
    let key_field = schema.key_field()?;
    if let Some(unknown) = input.keys().find(|name| schema.field_by_input(name).is_none()) {
        return Err(SyncError::UnknownField(unknown.clone()));
    }

    let key = input
        .get(key_field.input_name())
        .map(|raw| normalize_cell(key_field.storage, raw))
        .filter(|k| !k.is_empty())
        .ok_or_else(|| SyncError::MissingKey { field: key_field.name.to_string() })?;

    let tx = conn.unchecked_transaction()?;
    let exists: Option<i64> = tx
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE {} = ?1",
                quote_ident(schema.table),
                quote_ident(schema.key)
            ),
            [&key],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(SyncError::DuplicateKey(key));
    }

    let mut dictionaries = DictionaryStore::new();
    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for field in schema.fields.iter().filter(|f| f.name != schema.key) {
        let raw = input
            .get(field.input_name())
            .cloned()
            .or_else(|| field.transliterated_from.and_then(|from| input.get(from)).map(|v| translit(v)));

        let value = match (field.dictionary, field.storage, raw) {
            (Some(category), _, raw) => {
                Value::Integer(dictionaries.resolve(&tx, category, raw.as_deref().unwrap_or(""))?)
            }
            (None, storage @ StorageType::Code(_), Some(raw)) => Value::Text(normalize_cell(storage, &raw)),
            (None, _, Some(raw)) => Value::Text(raw),
            (None, _, None) => continue,
        };
        fields.push(field.name);
        values.push(value);
    }

    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    store::insert_rows(
        &tx,
        schema,
        &fields,
        &[(key.clone(), values)],
        &bookkeeping(Action::Insert, &stamp, true),
    )?;
    tx.commit()?;

    info!("{}: manual record '{key}' added", schema.table);
    Ok(key)
}
