use std::collections::{BTreeMap, HashMap};

use crate::error::SyncError;
use crate::schema::{FieldDescriptor, TableSchema};

/// A source column bound to a destination field.
#[derive(Debug, Clone, Copy)]
pub struct MappedColumn {
    /// 0-based column position in the source row.
    pub position: usize,
    pub field: &'static FieldDescriptor,
}

/// Source-column → field mapping resolved once from the header row.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    /// 1-based index of the header row.
    pub header_row: usize,
    /// 1-based index of the first data row (the row after the header).
    pub first_data_row: usize,
    pub key: MappedColumn,
    /// Non-key columns ordered by position.
    pub columns: Vec<MappedColumn>,
    unmapped: Vec<&'static str>,
}

impl ColumnMapping {
    /// Match header cells against descriptor labels by exact string comparison.
    ///
    /// If a label matches several descriptors the last one wins; if several
    /// columns carry the same label the right-most column wins.
    pub fn from_header(header: &[String], header_row: usize, schema: &TableSchema) -> Result<Self, SyncError> {
        let mut by_position: BTreeMap<usize, &'static FieldDescriptor> = BTreeMap::new();
        for (position, cell) in header.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            for field in schema.fields {
                if field.source_label == Some(cell.as_str()) {
                    by_position.insert(position, field);
                }
            }
        }

        let mut by_field: HashMap<&'static str, MappedColumn> = HashMap::new();
        for (&position, &field) in &by_position {
            by_field.insert(field.name, MappedColumn { position, field });
        }

        let key = by_field.remove(schema.key).ok_or_else(|| {
            let label = schema
                .field(schema.key)
                .and_then(|f| f.source_label)
                .unwrap_or_default();
            SyncError::MissingKeyColumn {
                field: schema.key.to_string(),
                label: label.to_string(),
            }
        })?;

        let unmapped = schema
            .fields
            .iter()
            .filter(|f| f.name != schema.key && !by_field.contains_key(f.name))
            .filter_map(|f| f.source_label)
            .collect();

        let mut columns: Vec<MappedColumn> = by_field.into_values().collect();
        columns.sort_by_key(|c| c.position);

        Ok(Self {
            header_row,
            first_data_row: header_row + 1,
            key,
            columns,
            unmapped,
        })
    }

    /// Labels of described columns that the header did not contain.
    pub fn unmapped_labels(&self) -> &[&'static str] {
        &self.unmapped
    }

    /// Destination names of the non-key columns, in mapping order.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.field.name).collect()
    }

    pub fn position_of(&self, field: &str) -> Option<usize> {
        if self.key.field.name == field {
            return Some(self.key.position);
        }
        self.columns
            .iter()
            .find(|c| c.field.name == field)
            .map(|c| c.position)
    }
}

/// A row with no non-empty cell.
pub fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}
