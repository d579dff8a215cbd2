//! Value normalization.
//!
//! Stored and incoming values are compared through [`canonical_text`]:
//! NULL is the empty string, integers print in decimal, reals with a zero
//! fraction print as integers, text is taken as-is. A stored `1` therefore
//! equals an incoming `"1"`, and a NULL column equals an empty cell.

use rusqlite::types::Value;

use crate::schema::StorageType;

pub fn canonical_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(n) => n.to_string(),
        Value::Real(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Value::Text(s) => s.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

pub fn same_value(stored: &Value, incoming: &Value) -> bool {
    canonical_text(stored) == canonical_text(incoming)
}

/// Normalize a raw source cell for a literal (non-dictionary) field.
pub fn normalize_cell(storage: StorageType, raw: &str) -> String {
    match storage {
        StorageType::Code(width) => normalize_code(raw, width as usize),
        StorageType::Text | StorageType::DictionaryRef => raw.to_string(),
    }
}

/// Trim a code and left-pad purely numeric codes with zeros to `width`.
pub fn normalize_code(raw: &str, width: usize) -> String {
    let code = raw.trim();
    if !code.is_empty() && code.len() < width && code.bytes().all(|b| b.is_ascii_digit()) {
        format!("{code:0>width$}")
    } else {
        code.to_string()
    }
}

pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(n) => serde_json::Value::from(*n),
        Value::Real(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}
