//! Workbook Reader - decodes an uploaded spreadsheet into raw sheets
//!
//! No semantic interpretation happens here: cells are passed through as
//! `CellValue`s and physical row/column order is preserved. Header rules:
//! - First non-blank row of a sheet is the header row
//! - Blank header cells become `__EMPTY`, `__EMPTY_1`, ...
//! - Duplicate headers get a positional suffix: `Name`, `Name_1`, `Name_2`
//! - Fully blank data rows are skipped

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Range, Reader, Sheets};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

/// Spreadsheet formats accepted by the importer, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Xlsx,
    Xlsm,
    Xlsb,
    Xls,
    Ods,
    Csv,
}

pub const ACCEPTED_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods", "csv"];

impl SpreadsheetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().to_ascii_lowercase().as_str() {
            "xlsx" => Some(Self::Xlsx),
            "xlsm" => Some(Self::Xlsm),
            "xlsb" => Some(Self::Xlsb),
            "xls" => Some(Self::Xls),
            "ods" => Some(Self::Ods),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Extension of a file name or storage path, lowercased, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A raw cell value. Serializes to the matching JSON scalar (`Blank` is `null`).
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Blank,
}

impl CellValue {
    fn is_blank(&self) -> bool {
        match self {
            CellValue::Blank => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Blank,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            // Serial number, left for the model to interpret
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => CellValue::Text(format!("{}", e)),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Blank => serializer.serialize_unit(),
        }
    }
}

/// One data row: header -> value, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub cells: Vec<(String, CellValue)>,
}

#[cfg(test)]
impl RawRow {
    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v)
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (header, value) in &self.cells {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<RawRow>,
}

/// Every sheet of one upload, in workbook order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<RawSheet>,
}

impl Workbook {
    #[cfg(test)]
    pub fn sheet(&self, name: &str) -> Option<&RawSheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.sheets.iter().map(|s| s.rows.len()).sum()
    }
}

/// Serializes as `{"<sheet>": [row, ...], ...}`, keeping sheet order.
impl Serialize for Workbook {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sheets.len()))?;
        for sheet in &self.sheets {
            map.serialize_entry(&sheet.name, &sheet.rows)?;
        }
        map.end()
    }
}

// =============================================================================
// READING
// =============================================================================

/// Decode raw upload bytes. Any decode failure is fatal: no partial sheets are returned.
pub fn read_workbook(bytes: &[u8], format: SpreadsheetFormat, file_name: &str) -> Result<Workbook> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: Sheets<Cursor<Vec<u8>>> = match format {
        SpreadsheetFormat::Xlsx | SpreadsheetFormat::Xlsm => Sheets::Xlsx(
            open_workbook_from_rs(cursor).context("Failed to open xlsx workbook")?,
        ),
        SpreadsheetFormat::Xlsb => Sheets::Xlsb(
            open_workbook_from_rs(cursor).context("Failed to open xlsb workbook")?,
        ),
        SpreadsheetFormat::Xls => Sheets::Xls(
            open_workbook_from_rs(cursor).context("Failed to open xls workbook")?,
        ),
        SpreadsheetFormat::Ods => Sheets::Ods(
            open_workbook_from_rs(cursor).context("Failed to open ods workbook")?,
        ),
        SpreadsheetFormat::Csv => return read_csv(bytes, file_name),
    };

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for name in sheet_names {
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("Failed to read sheet '{}'", name))?;
        let rows = range_to_rows(&range);
        tracing::debug!(sheet = %name, rows = rows.len(), "read sheet");
        sheets.push(RawSheet { name, rows });
    }

    Ok(Workbook { sheets })
}

fn range_to_rows(range: &Range<Data>) -> Vec<RawRow> {
    let mut rows_iter = range
        .rows()
        .map(|row| row.iter().map(CellValue::from).collect::<Vec<_>>())
        .skip_while(|cells| cells.iter().all(CellValue::is_blank));

    let Some(header_cells) = rows_iter.next() else {
        return Vec::new();
    };
    let headers = unique_headers(header_cells.iter().map(header_text).collect());

    rows_iter
        .filter(|cells| !cells.iter().all(CellValue::is_blank))
        .map(|cells| zip_row(&headers, cells))
        .collect()
}

fn read_csv(bytes: &[u8], file_name: &str) -> Result<Workbook> {
    let content = decode_text(bytes);
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for (line_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at line {}", line_idx + 1))?;
        let cells: Vec<CellValue> = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    CellValue::Blank
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        records.push(cells);
    }

    // Rows may be wider than the header; extra columns get blank-header names.
    let width = records.iter().map(Vec::len).max().unwrap_or(0);
    let mut records = records
        .into_iter()
        .skip_while(|cells| cells.iter().all(CellValue::is_blank));

    let rows = match records.next() {
        Some(header_cells) => {
            let mut raw_headers: Vec<String> = header_cells.iter().map(header_text).collect();
            raw_headers.resize(width, String::new());
            let headers = unique_headers(raw_headers);
            records
                .filter(|cells| !cells.iter().all(CellValue::is_blank))
                .map(|cells| zip_row(&headers, cells))
                .collect()
        }
        None => Vec::new(),
    };

    Ok(Workbook {
        sheets: vec![RawSheet {
            name: csv_sheet_name(file_name),
            rows,
        }],
    })
}

/// CSV uploads from spreadsheet tools are often Windows-1252 rather than UTF-8.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

fn csv_sheet_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);
    if stem.is_empty() {
        "Sheet1".to_string()
    } else {
        stem.to_string()
    }
}

fn zip_row(headers: &[String], cells: Vec<CellValue>) -> RawRow {
    let mut cells = cells.into_iter();
    RawRow {
        cells: headers
            .iter()
            .map(|h| (h.clone(), cells.next().unwrap_or(CellValue::Blank)))
            .collect(),
    }
}

fn header_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(s) => s.trim().to_string(),
        CellValue::Number(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        CellValue::Number(f) => f.to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Blank => String::new(),
    }
}

/// Blank headers become `__EMPTY[_n]`; repeated headers get `_1`, `_2`, ... in column order.
fn unique_headers(raw: Vec<String>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut headers = Vec::with_capacity(raw.len());

    for header in raw {
        let base = if header.is_empty() {
            "__EMPTY".to_string()
        } else {
            header
        };

        if used.insert(base.clone()) {
            headers.push(base);
            continue;
        }

        let counter = counters.entry(base.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", base, counter);
            if used.insert(candidate.clone()) {
                headers.push(candidate);
                break;
            }
        }
    }

    headers
}
