// Source snapshot readers

use std::path::Path;

pub mod csv;
pub mod xlsx;

/// Source rows in file order, header included.
#[derive(Debug, Clone, Default)]
pub struct SourceRows {
    /// Worksheet the rows came from (workbooks only).
    pub sheet_name: Option<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
    Excel,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "tsv" | "tab" => Some(Self::Tsv),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }
}

/// Read a source file, choosing the reader by extension.
pub fn read_rows(path: &Path) -> Result<SourceRows, String> {
    if !path.exists() {
        return Err(format!("file not found: {}", path.display()));
    }
    let format = SourceFormat::from_path(path)
        .ok_or_else(|| format!("unsupported source format: {}", path.display()))?;

    match format {
        SourceFormat::Csv => Ok(SourceRows { sheet_name: None, rows: csv::read_rows(path)? }),
        SourceFormat::Tsv => Ok(SourceRows { sheet_name: None, rows: csv::read_tsv_rows(path)? }),
        SourceFormat::Excel => {
            let sheet = xlsx::read_first_sheet(path)?;
            Ok(SourceRows { sheet_name: Some(sheet.name), rows: sheet.rows })
        }
    }
}
