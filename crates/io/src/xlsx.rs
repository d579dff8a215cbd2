// Excel/ODS source snapshots (first worksheet only)

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};

/// First worksheet of a workbook as text rows.
#[derive(Debug, Clone, Default)]
pub struct SheetRows {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Read the first worksheet of an Excel file (xlsx, xlsm, xls, xlsb, ods).
///
/// Positions are absolute: when the used range does not begin at A1 the
/// leading rows and columns are filled with empty cells, so row indexes
/// match the sheet's own numbering.
pub fn read_first_sheet(path: &Path) -> Result<SheetRows, String> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open Excel file: {}", e))?;

    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| "Excel file contains no sheets".to_string())?;

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| format!("Failed to read sheet '{}': {}", name, e))?;

    let (height, width) = range.get_size();
    if height == 0 || width == 0 {
        return Ok(SheetRows { name, rows: Vec::new() });
    }

    // Range start offset (data may not begin at A1)
    let (data_start_row, data_start_col) = range.start().unwrap_or((0, 0));
    let mut rows: Vec<Vec<String>> = vec![Vec::new(); data_start_row as usize];

    for row in range.rows() {
        let mut cells = vec![String::new(); data_start_col as usize];
        cells.extend(row.iter().map(cell_text));
        rows.push(cells);
    }

    Ok(SheetRows { name, rows })
}

/// Text form of one cell as a user would read it.
pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            // Format nicely: integers without decimals
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => format!("{}", n),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("#{:?}", e),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    #[test]
    fn test_first_sheet_with_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("post.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Index").unwrap();
        sheet.write_string(2, 1, "Code").unwrap();
        sheet.write_string(2, 2, "Місто").unwrap();
        sheet.write_number(3, 1, 1001.0).unwrap();
        sheet.write_string(3, 2, "Київ").unwrap();
        sheet.write_number(4, 1, 2.5).unwrap();
        let second = workbook.add_worksheet();
        second.write_string(0, 0, "ignored").unwrap();
        workbook.save(&path).unwrap();

        let sheet = read_first_sheet(&path).unwrap();
        assert_eq!(sheet.name, "Index");
        assert_eq!(sheet.rows.len(), 5);
        assert!(sheet.rows[0].is_empty());
        assert_eq!(sheet.rows[2], vec!["", "Code", "Місто"]);
        assert_eq!(sheet.rows[3], vec!["", "1001", "Київ"]);
        assert_eq!(sheet.rows[4][1], "2.5");
    }

    #[test]
    fn test_empty_first_sheet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.xlsx");

        let mut workbook = Workbook::new();
        workbook.add_worksheet();
        workbook.save(&path).unwrap();

        let sheet = read_first_sheet(&path).unwrap();
        assert!(sheet.rows.is_empty());
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(read_first_sheet(&path).unwrap_err().starts_with("Failed to open Excel file"));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Float(42.0)), "42");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Bool(true)), "TRUE");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
