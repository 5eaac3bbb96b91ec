//! Tabular input: CSV and JSON batches turned into a uniform `RawTable`.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::{ReaderBuilder, Trim};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// A single input value before any typing is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Cell {
    /// Interprets a raw CSV field. Blank fields are missing values; anything
    /// else keeps its text so identifiers such as `007` survive unchanged.
    /// Numeric coercion happens in `as_f64`.
    pub fn from_field(field: &str) -> Self {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            Cell::Null
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            // keep serde_json's rendering of the number, not an f64 re-format
            Value::Number(n) => Cell::Text(n.to_string()),
            Value::String(s) => Cell::Text(s.clone()),
            // nested structures carry nothing the pipeline can use
            Value::Array(_) | Value::Object(_) => Cell::Null,
        }
    }

    /// Numeric view of the cell; anything non-numeric counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    fn from_excel(value: &Data) -> Self {
        match value {
            Data::Empty | Data::Error(_) => Cell::Null,
            Data::String(s) => Cell::from_field(s),
            Data::Int(i) => Cell::Text(i.to_string()),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            other => Cell::from_field(&other.to_string()),
        }
    }

    /// Textual view of the cell, `None` when missing or blank.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Number(v) => Some(format!("{}", v)),
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

pub type RawRow = BTreeMap<String, Cell>;

/// Ordered rows of column-name to cell. A column can be present while every
/// one of its cells is `Null`; that is a different situation from the column
/// being absent altogether.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

impl RawTable {
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        RawTable { columns, rows }
    }

    /// Builds a table whose column set is declared up front, e.g. from a CSV
    /// header, so empty columns still count as present.
    pub fn with_columns(columns: Vec<String>, rows: Vec<RawRow>) -> Self {
        RawTable { columns, rows }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for (line, result) in rdr.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "Skipping unreadable CSV row");
                    skipped += 1;
                    continue;
                }
            };
            let row: RawRow = headers
                .iter()
                .zip(record.iter())
                .map(|(name, field)| (name.clone(), Cell::from_field(field)))
                .collect();
            rows.push(row);
        }

        debug!(rows = rows.len(), skipped, columns = headers.len(), "Loaded CSV batch");
        Ok(RawTable::with_columns(headers, rows))
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file)
    }

    /// Accepts an array of JSON objects. Entries that are not objects are
    /// skipped rather than failing the batch.
    pub fn from_json_values(values: &[Value]) -> Self {
        let mut rows = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            match value {
                Value::Object(map) => rows.push(
                    map.iter()
                        .map(|(k, v)| (k.trim().to_string(), Cell::from_json(v)))
                        .collect(),
                ),
                _ => warn!(index, "Skipping JSON entry that is not an object"),
            }
        }
        RawTable::from_rows(rows)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let values: Vec<Value> = serde_json::from_slice(bytes)?;
        Ok(Self::from_json_values(&values))
    }

    /// Reads the first worksheet of an xlsx/xls/ods workbook. The first row
    /// is the header.
    pub fn from_excel_bytes(bytes: &[u8]) -> Result<Self> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| PipelineError::Schema("workbook has no worksheets".to_string()))??;

        let mut sheet_rows = range.rows();
        let Some(header) = sheet_rows.next() else {
            return Ok(RawTable::default());
        };
        let headers: Vec<String> = header
            .iter()
            .map(|c| Cell::from_excel(c).as_text().unwrap_or_default())
            .collect();

        let rows: Vec<RawRow> = sheet_rows
            .map(|cells| {
                headers
                    .iter()
                    .zip(cells)
                    .map(|(name, value)| (name.clone(), Cell::from_excel(value)))
                    .collect()
            })
            .collect();

        debug!(rows = rows.len(), columns = headers.len(), "Loaded spreadsheet batch");
        Ok(RawTable::with_columns(headers, rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
