//! Field descriptor table: the static metadata that drives DDL, header
//! mapping, address projection and per-language field subsets.
//!
//! A [`TableSchema`] is plain data. It is built once per deployment
//! (see [`POST_INFO`]) and passed by reference into every operation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Descriptor types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Fixed-width code (postal/office codes). Numeric codes are zero-padded.
    Code(u8),
    /// Free text.
    Text,
    /// Integer foreign key into the field's dictionary table.
    DictionaryRef,
}

impl StorageType {
    pub fn sql_type(&self) -> String {
        match self {
            Self::Code(width) => format!("VARCHAR({width})"),
            Self::Text => "VARCHAR(255)".to_string(),
            Self::DictionaryRef => "INTEGER".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ukr,
    En,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ukr => write!(f, "ukr"),
            Self::En => write!(f, "en"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ukr" | "uk" => Ok(Self::Ukr),
            "en" | "eng" => Ok(Self::En),
            other => Err(format!("unknown language '{other}' (expected 'ukr' or 'en')")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub storage: StorageType,
    /// Exact header text of the source column feeding this field.
    pub source_label: Option<&'static str>,
    /// Dictionary category (also the dictionary table name).
    pub dictionary: Option<&'static str>,
    pub language: Option<Language>,
    /// Position in the projected address string (ascending).
    pub address_rank: Option<u8>,
    /// Input name whose value is transliterated into this field on manual insert.
    pub transliterated_from: Option<&'static str>,
}

impl FieldDescriptor {
    const fn new(name: &'static str, storage: StorageType) -> Self {
        Self {
            name,
            storage,
            source_label: None,
            dictionary: None,
            language: None,
            address_rank: None,
            transliterated_from: None,
        }
    }

    pub const fn code(name: &'static str, width: u8) -> Self {
        Self::new(name, StorageType::Code(width))
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, StorageType::Text)
    }

    pub const fn dictionary(name: &'static str, category: &'static str) -> Self {
        Self {
            dictionary: Some(category),
            ..Self::new(name, StorageType::DictionaryRef)
        }
    }

    pub const fn label(self, label: &'static str) -> Self {
        Self { source_label: Some(label), ..self }
    }

    pub const fn language(self, language: Language) -> Self {
        Self { language: Some(language), ..self }
    }

    pub const fn address_rank(self, rank: u8) -> Self {
        Self { address_rank: Some(rank), ..self }
    }

    pub const fn transliterated_from(self, input: &'static str) -> Self {
        Self { transliterated_from: Some(input), ..self }
    }

    pub fn is_dictionary(&self) -> bool {
        self.dictionary.is_some()
    }

    /// Name used for this field in user-facing input and query output:
    /// the dictionary category for dictionary-backed fields, the column name otherwise.
    pub fn input_name(&self) -> &'static str {
        self.dictionary.unwrap_or(self.name)
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping columns
// ---------------------------------------------------------------------------

pub const CREATED_MANUAL: &str = "created_manual";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const CHECKED_AT: &str = "checked_at";

const BOOKKEEPING_DDL: &[(&str, &str)] = &[
    (CREATED_MANUAL, "INTEGER NOT NULL DEFAULT 0"),
    (CREATED_AT, "DATETIME"),
    (UPDATED_AT, "DATETIME"),
    (CHECKED_AT, "DATETIME"),
];

/// Which write a row receives; decides the bookkeeping columns it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    /// Row observed unchanged (staleness policy only).
    Touch,
}

/// Bookkeeping values for `action`, stamped with the run timestamp.
pub fn bookkeeping(action: Action, stamp: &str, manual: bool) -> Vec<(&'static str, rusqlite::types::Value)> {
    use rusqlite::types::Value;

    let stamp = || Value::Text(stamp.to_string());
    match action {
        Action::Insert => vec![
            (CREATED_MANUAL, Value::Integer(manual as i64)),
            (CREATED_AT, stamp()),
            (UPDATED_AT, stamp()),
            (CHECKED_AT, stamp()),
        ],
        Action::Update => vec![(UPDATED_AT, stamp()), (CHECKED_AT, stamp())],
        Action::Touch => vec![(CHECKED_AT, stamp())],
    }
}

// ---------------------------------------------------------------------------
// Table schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    /// Name of the natural-key field.
    pub key: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up by input name (dictionary category or column name).
    pub fn field_by_input(&self, input: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.input_name() == input)
    }

    pub fn key_field(&self) -> Result<&'static FieldDescriptor, SyncError> {
        self.field(self.key)
            .ok_or_else(|| SyncError::InvalidSchema(format!("key field '{}' is not described", self.key)))
    }

    pub fn dictionary_fields(&self) -> impl Iterator<Item = &'static FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_dictionary())
    }

    /// Distinct dictionary categories in descriptor order.
    pub fn dictionary_categories(&self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        self.dictionary_fields()
            .filter_map(|f| f.dictionary)
            .filter(|c| seen.insert(*c))
            .collect()
    }

    /// Language-neutral fields plus the fields tagged with `language`.
    pub fn fields_for(&self, language: Language) -> impl Iterator<Item = &'static FieldDescriptor> {
        self.fields
            .iter()
            .filter(move |f| f.language.map_or(true, |l| l == language))
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: String| Err(SyncError::InvalidSchema(msg));

        if self.table.is_empty() {
            return invalid("table name is empty".into());
        }

        let key = self.key_field()?;
        if key.is_dictionary() {
            return invalid(format!("key field '{}' cannot be dictionary-backed", key.name));
        }
        if key.source_label.is_none() {
            return invalid(format!("key field '{}' has no source column label", key.name));
        }

        let mut names = HashSet::new();
        for field in self.fields {
            if !names.insert(field.name) {
                return invalid(format!("field '{}' is described twice", field.name));
            }
            if BOOKKEEPING_DDL.iter().any(|(b, _)| *b == field.name) {
                return invalid(format!("field '{}' collides with a bookkeeping column", field.name));
            }
            match (field.storage, field.dictionary) {
                (StorageType::DictionaryRef, None) => {
                    return invalid(format!("field '{}' is a dictionary reference without a category", field.name));
                }
                (StorageType::Code(_) | StorageType::Text, Some(category)) => {
                    return invalid(format!(
                        "field '{}' is bound to dictionary '{category}' but is not a dictionary reference",
                        field.name
                    ));
                }
                _ => {}
            }
            if field.address_rank.is_some() && (!field.is_dictionary() || field.language.is_none()) {
                return invalid(format!(
                    "field '{}' has an address rank but is not a language-tagged dictionary field",
                    field.name
                ));
            }
            if let Some(from) = field.transliterated_from {
                if self.field_by_input(from).is_none() {
                    return invalid(format!("field '{}' is transliterated from unknown input '{from}'", field.name));
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // DDL
    // -----------------------------------------------------------------------

    /// `CREATE TABLE IF NOT EXISTS` statements: dictionaries first, then the main table.
    pub fn create_statements(&self) -> Vec<String> {
        let mut statements: Vec<String> = self
            .dictionary_categories()
            .into_iter()
            .map(|category| {
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"value\" VARCHAR(255) NOT NULL DEFAULT '')",
                    quote_ident(category)
                )
            })
            .collect();

        let mut columns: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let mut col = format!("{} {}", quote_ident(f.name), f.storage.sql_type());
                if f.name == self.key {
                    col.push_str(" NOT NULL PRIMARY KEY");
                }
                col
            })
            .collect();
        columns.extend(
            BOOKKEEPING_DDL
                .iter()
                .map(|(name, ty)| format!("{} {ty}", quote_ident(name))),
        );
        columns.extend(self.dictionary_fields().filter_map(|f| {
            f.dictionary.map(|category| {
                format!(
                    "FOREIGN KEY ({}) REFERENCES {} (\"id\")",
                    quote_ident(f.name),
                    quote_ident(category)
                )
            })
        }));

        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(self.table),
            columns.join(", ")
        ));
        statements
    }

    pub fn ensure_tables(&self, conn: &Connection) -> Result<(), SyncError> {
        for sql in self.create_statements() {
            conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    pub fn table_exists(&self, conn: &Connection) -> Result<bool, SyncError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [self.table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Double-quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ---------------------------------------------------------------------------
// Deployment descriptor: post office index table
// ---------------------------------------------------------------------------

const POST_INFO_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::code("post_office_id", 5)
        .label("Поштовий індекс відділення зв`язку (Post code of post office)"),
    FieldDescriptor::dictionary("region_ukr_id", "region_ukr")
        .label("Область")
        .language(Language::Ukr)
        .address_rank(1),
    FieldDescriptor::dictionary("district_old_ukr_id", "district_old_ukr")
        .label("Район (старий)")
        .language(Language::Ukr),
    FieldDescriptor::dictionary("district_new_ukr_id", "district_new_ukr")
        .label("Район (новий)")
        .language(Language::Ukr)
        .address_rank(2),
    FieldDescriptor::dictionary("settlement_ukr_id", "settlement_ukr")
        .label("Населений пункт")
        .language(Language::Ukr)
        .address_rank(3),
    FieldDescriptor::code("postal_code", 5).label("Поштовий індекс (Postal code)"),
    FieldDescriptor::dictionary("region_en_id", "region_en")
        .label("Region (Oblast)")
        .language(Language::En)
        .address_rank(1)
        .transliterated_from("region_ukr"),
    FieldDescriptor::dictionary("district_new_en_id", "district_new_en")
        .label("District new (Raion new)")
        .language(Language::En)
        .address_rank(2)
        .transliterated_from("district_new_ukr"),
    FieldDescriptor::dictionary("settlement_en_id", "settlement_en")
        .label("Settlement")
        .language(Language::En)
        .address_rank(3)
        .transliterated_from("settlement_ukr"),
    FieldDescriptor::text("post_office_ukr")
        .label("Вiддiлення зв`язку")
        .language(Language::Ukr),
    FieldDescriptor::text("post_office_en")
        .label("Post office")
        .language(Language::En)
        .transliterated_from("post_office_ukr"),
];

/// Ukrposhta post office index table.
pub const POST_INFO: TableSchema = TableSchema {
    table: "post_info",
    key: "post_office_id",
    fields: POST_INFO_FIELDS,
};
