use std::fmt;

#[derive(Debug)]
pub enum SyncError {
    /// Descriptor table is inconsistent (duplicate names, bad dictionary binding, etc.).
    InvalidSchema(String),
    /// Run options out of range.
    InvalidOptions(String),
    /// Source has no non-empty row to use as a header.
    EmptySource,
    /// The natural-key descriptor never received a column from the header.
    MissingKeyColumn { field: String, label: String },
    /// Manual insert without a natural key value.
    MissingKey { field: String },
    /// Manual insert for a key that already exists.
    DuplicateKey(String),
    /// Field name not present in the descriptor table.
    UnknownField(String),
    /// Query parameter out of range (page size, etc.).
    InvalidQuery(String),
    /// Storage failure (constraint violation, I/O, connection loss).
    Storage(rusqlite::Error),
}

impl SyncError {
    /// True for errors raised before any write could happen.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidSchema(_) | Self::InvalidOptions(_) | Self::MissingKeyColumn { .. }
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSchema(msg) => write!(f, "invalid schema: {msg}"),
            Self::InvalidOptions(msg) => write!(f, "invalid options: {msg}"),
            Self::EmptySource => write!(f, "source has no header row"),
            Self::MissingKeyColumn { field, label } => {
                write!(f, "key field '{field}' not found in source header (expected column '{label}')")
            }
            Self::MissingKey { field } => write!(f, "missing value for key field '{field}'"),
            Self::DuplicateKey(key) => write!(f, "record '{key}' already exists"),
            Self::UnknownField(name) => write!(f, "unknown field: {name}"),
            Self::InvalidQuery(msg) => write!(f, "invalid query: {msg}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}
