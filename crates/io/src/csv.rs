// CSV/TSV source snapshots

use std::io::Read;
use std::path::Path;

/// Read every record of a CSV file as text cells, sniffing the delimiter.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    rows_from_string(&content, delimiter)
}

pub fn read_tsv_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let content = read_file_as_utf8(path)?;
    rows_from_string(&content, b'\t')
}

/// Non-blank lines inspected when guessing the delimiter.
const SNIFF_LINES: usize = 10;

/// Candidates in tie-break order; exports of the index use `;`.
const DELIMITERS: [u8; 4] = [b';', b'\t', b',', b'|'];

/// Guess the field delimiter from the opening lines.
///
/// Each candidate parses the sample once; its score is the most common record
/// width times the number of records at that width. Title rows above the
/// header therefore don't disqualify a delimiter. Widths of one field never
/// score, and `,` is the fallback.
fn sniff_delimiter(content: &str) -> u8 {
    let sample = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    let mut best = (b',', 0);
    for delim in DELIMITERS {
        let score = modal_score(&record_widths(&sample, delim));
        if score > best.1 {
            best = (delim, score);
        }
    }
    best.0
}

fn record_widths(sample: &str, delim: u8) -> Vec<usize> {
    csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample.as_bytes())
        .records()
        .map_while(Result::ok)
        .map(|r| r.len())
        .collect()
}

/// Modal width times its frequency; zero when the modal width is one field.
fn modal_score(widths: &[usize]) -> usize {
    let mut freq = std::collections::BTreeMap::new();
    for &w in widths {
        *freq.entry(w).or_insert(0usize) += 1;
    }
    // Wider record wins a frequency tie
    match freq.into_iter().max_by_key(|&(w, n)| (n, w)) {
        Some((width, n)) if width > 1 => width * n,
        _ => 0,
    }
}

/// Read file and convert to UTF-8 if needed (BOM stripped, Windows-1252 fallback).
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(s)),
        Err(e) => {
            let bytes = e.into_bytes();
            // Excel-exported CSVs
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

fn rows_from_string(content: &str, delimiter: u8) -> Result<Vec<Vec<String>>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| format!("row {}: {e}", row_idx + 1))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}
