//! Read-side address projection.
//!
//! The address of a record is the concatenation of its address-ranked
//! dictionary labels for one language, ascending by rank, joined with a
//! separator. Labels are read through `LEFT JOIN`s against the dictionary
//! tables at query time.

use crate::schema::{quote_ident, FieldDescriptor, Language, TableSchema};

pub const DEFAULT_SEPARATOR: &str = ", ";

/// Address-ranked dictionary fields of `language`, ascending by rank.
pub fn address_fields(schema: &TableSchema, language: Language) -> Vec<&'static FieldDescriptor> {
    let mut fields: Vec<&'static FieldDescriptor> = schema
        .fields_for(language)
        .filter(|f| f.is_dictionary() && f.language == Some(language))
        .filter(|f| f.address_rank.is_some())
        .collect();
    fields.sort_by_key(|f| f.address_rank);
    fields
}

/// Alias under which the dictionary table of `field` is joined.
pub fn join_alias(field: &FieldDescriptor) -> String {
    quote_ident(&format!("{}_dict", field.name))
}

/// Qualified label column of a joined dictionary.
pub fn label_column(field: &FieldDescriptor) -> String {
    format!("{}.\"value\"", join_alias(field))
}

/// SQL expression yielding the address string. Empty when the language
/// has no address fields.
pub fn address_expression(schema: &TableSchema, language: Language, separator: &str) -> String {
    let parts: Vec<String> = address_fields(schema, language)
        .into_iter()
        .map(|f| format!("COALESCE({}, '')", label_column(f)))
        .collect();
    if parts.is_empty() {
        return "''".to_string();
    }
    if separator.is_empty() {
        parts.join(" || ")
    } else {
        parts.join(&format!(" || {} || ", sql_literal(separator)))
    }
}

/// `LEFT JOIN` clauses for every dictionary-backed field visible in `language`.
pub fn dictionary_joins(schema: &TableSchema, language: Language) -> String {
    schema
        .fields_for(language)
        .filter_map(|f| {
            f.dictionary.map(|category| {
                format!(
                    " LEFT JOIN {} AS {alias} ON {alias}.\"id\" = {}.{}",
                    quote_ident(category),
                    quote_ident(schema.table),
                    quote_ident(f.name),
                    alias = join_alias(f),
                )
            })
        })
        .collect()
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
