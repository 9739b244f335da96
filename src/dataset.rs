// 🗂️ Dataset - in-memory tables for base and target exports
// Rows are string cells under one column schema; identity is positional.

use crate::error::{LinkageError, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::warn;

// ============================================================================
// SIDE
// ============================================================================

/// Which input table a column or row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Presumed-authoritative table supplying transposed values
    Base,
    /// Table being enriched from the base
    Target,
}

impl Side {
    pub fn name(&self) -> &str {
        match self {
            Side::Base => "base",
            Side::Target => "target",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// DATASET
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "DatasetParts")]
pub struct Dataset {
    /// Display name (usually the file stem)
    name: String,

    /// Source row number of the first row (non-zero for preview slices)
    origin: usize,

    columns: Vec<String>,

    rows: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct DatasetParts {
    #[serde(default)]
    name: String,
    #[serde(default)]
    origin: usize,
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

impl From<DatasetParts> for Dataset {
    fn from(parts: DatasetParts) -> Self {
        Dataset::new(parts.name, parts.columns, parts.rows).with_origin(parts.origin)
    }
}

impl Dataset {
    /// Build a dataset, padding short rows and truncating long ones to the schema width
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let name = name.into();
        let width = columns.len();

        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, mut row)| {
                if row.len() > width {
                    warn!(
                        dataset = %name,
                        row = i,
                        cells = row.len(),
                        columns = width,
                        "row wider than header; extra cells dropped"
                    );
                }
                row.resize(width, String::new());
                row
            })
            .collect();

        Dataset {
            name,
            origin: 0,
            columns,
            rows,
        }
    }

    /// Dataset with a schema and no rows
    pub fn empty(name: impl Into<String>, columns: Vec<String>) -> Self {
        Dataset::new(name, columns, Vec::new())
    }

    pub fn with_origin(mut self, origin: usize) -> Self {
        self.origin = origin;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column in the schema (first one wins on duplicates)
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn record(&self, position: usize) -> Option<Record<'_>> {
        (position < self.rows.len()).then_some(Record {
            dataset: self,
            position,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        (0..self.rows.len()).map(move |position| Record {
            dataset: self,
            position,
        })
    }

    /// Append a row, padded or truncated to the schema width
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Add a column filled with empty cells; returns the existing index if already present
    pub fn push_column(&mut self, column: &str) -> usize {
        if let Some(index) = self.column_index(column) {
            return index;
        }

        self.columns.push(column.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.columns.len() - 1
    }

    /// Overwrite one cell; returns false when the position is out of range
    pub fn set(&mut self, position: usize, column_index: usize, value: impl Into<String>) -> bool {
        match self
            .rows
            .get_mut(position)
            .and_then(|row| row.get_mut(column_index))
        {
            Some(cell) => {
                *cell = value.into();
                true
            }
            None => false,
        }
    }

    /// Contiguous window of rows, keeping original row numbers (preview mode)
    pub fn slice(&self, start: usize, len: usize) -> Dataset {
        let start = start.min(self.rows.len());
        let end = start.saturating_add(len).min(self.rows.len());

        Dataset {
            name: self.name.clone(),
            origin: self.origin + start,
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    pub fn head(&self, len: usize) -> Dataset {
        self.slice(0, len)
    }

    /// New dataset holding the given row positions, in the order given
    pub fn select_rows(&self, name: impl Into<String>, positions: &[usize]) -> Dataset {
        let rows = positions
            .iter()
            .filter_map(|&p| self.rows.get(p).cloned())
            .collect();

        Dataset {
            name: name.into(),
            origin: 0,
            columns: self.columns.clone(),
            rows,
        }
    }

    // ========================================================================
    // CSV I/O
    // ========================================================================

    /// Read a headed CSV; cells that are not valid UTF-8 are decoded as Latin-1
    pub fn from_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let mut columns: Vec<String> = rdr.byte_headers()?.iter().map(decode_cell).collect();
        if let Some(first) = columns.first_mut() {
            *first = first.trim_start_matches('\u{feff}').to_string();
        }

        let mut rows = Vec::new();
        for result in rdr.byte_records() {
            let record = result?;
            rows.push(record.iter().map(decode_cell).collect());
        }

        Ok(Dataset::new(name, columns, rows))
    }

    /// Load by extension: spreadsheets through calamine, anything else as CSV
    pub fn load(path: &Path) -> Result<Self> {
        let is_spreadsheet = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SPREADSHEET_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)));

        if is_spreadsheet {
            Dataset::load_xlsx(path)
        } else {
            Dataset::load_csv(path)
        }
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Dataset::from_reader(file_stem(path), file)
    }

    /// First worksheet of a workbook; the first row is the header, every cell becomes a string
    pub fn load_xlsx(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| LinkageError::EmptyWorkbook(path.display().to_string()))??;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(render_cell).collect::<Vec<String>>());
        let columns = rows.next().unwrap_or_default();

        Ok(Dataset::new(file_stem(path), columns, rows.collect()))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))
    }
}

/// Extensions `Dataset::load` reads as workbooks
pub const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Whole floats lose their ".0" (phone numbers stored as numbers); dates render as ISO
fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            (*f as i64).to_string()
        }
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) if datetime.time() == NaiveTime::MIN => {
                datetime.format("%Y-%m-%d").to_string()
            }
            Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        other => other.to_string(),
    }
}

fn decode_cell(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// Borrowed view of one row: an ordered column -> value mapping
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    dataset: &'a Dataset,
    position: usize,
}

impl<'a> Record<'a> {
    /// Row number in the original source table
    pub fn index(&self) -> usize {
        self.dataset.origin + self.position
    }

    /// Row position inside this dataset
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn values(&self) -> &'a [String] {
        &self.dataset.rows[self.position]
    }

    /// Cell by column position; empty when out of range
    pub fn value(&self, column_index: usize) -> &'a str {
        self.values()
            .get(column_index)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.dataset
            .column_index(column)
            .map(|index| self.value(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let dataset = self.dataset;
        dataset
            .columns
            .iter()
            .map(String::as_str)
            .zip(self.values().iter().map(String::as_str))
    }
}

// ============================================================================
// TESTS
// ============================================================================
