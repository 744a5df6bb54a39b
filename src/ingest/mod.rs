// Spreadsheet import for source rows, plus the blank template offered for download.
pub mod csv;
pub mod xlsx;

use crate::db::models::NewSourceRow;
use std::error::Error;
use std::fmt;

pub const REQUIRED_COLUMNS: [&str; 3] = ["sql_src", "sql_length", "sql_modified"];

#[derive(Debug)]
pub enum IngestError {
    IoError(std::io::Error),
    ParsingError(String),
    MissingColumns(Vec<String>),
    InvalidValue {
        row: usize,
        column: &'static str,
        message: String,
    },
    UnsupportedFileType(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::IoError(err) => write!(f, "IO error: {}", err),
            IngestError::ParsingError(msg) => write!(f, "Could not read spreadsheet: {}", msg),
            IngestError::MissingColumns(columns) => {
                write!(f, "Missing required columns: {}", columns.join(", "))
            }
            IngestError::InvalidValue {
                row,
                column,
                message,
            } => write!(f, "Row {}, column {}: {}", row, column, message),
            IngestError::UnsupportedFileType(ext) => write!(f, "Unsupported file type: {}", ext),
        }
    }
}

impl Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::IoError(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(n) => n.to_string(),
            // Integers stored as floats print without decimals
            Cell::Float(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Float(n) => n.to_string(),
            Cell::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Cell::Int(n) => Some(*n),
            Cell::Float(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A header row and the data rows below it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

pub trait SheetReader: Send + Sync {
    fn read(&self, bytes: &[u8]) -> Result<Sheet, IngestError>;
}

/// Picks a reader from the uploaded file name's extension.
pub fn reader_for(file_name: &str) -> Result<Box<dyn SheetReader>, IngestError> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| IngestError::UnsupportedFileType("No extension".to_string()))?;

    match extension.to_lowercase().as_str() {
        "csv" => Ok(Box::new(csv::CsvReader::new())),
        "tsv" | "tab" => Ok(Box::new(csv::CsvReader::with_delimiter(b'\t'))),
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(Box::new(xlsx::XlsxReader)),
        _ => Err(IngestError::UnsupportedFileType(extension.to_string())),
    }
}

/// Required columns absent from the sheet, in the order they are required.
pub fn validate_columns(sheet: &Sheet) -> Vec<String> {
    REQUIRED_COLUMNS
        .iter()
        .filter(|column| sheet.column_index(column).is_none())
        .map(|column| column.to_string())
        .collect()
}

/// Converts a validated sheet into rows, dropping columns that are not required.
pub fn to_source_rows(sheet: &Sheet) -> Result<Vec<NewSourceRow>, IngestError> {
    let missing = validate_columns(sheet);
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    // validate_columns guarantees all three are present
    let index = |name| sheet.column_index(name).unwrap_or_default();
    let (src_idx, len_idx, modified_idx) =
        (index("sql_src"), index("sql_length"), index("sql_modified"));
    let cell = |row: &[Cell], idx: usize| row.get(idx).cloned().unwrap_or(Cell::Empty);

    let mut rows = Vec::with_capacity(sheet.rows.len());
    for (offset, row) in sheet.rows.iter().enumerate() {
        if row.iter().all(Cell::is_empty) {
            continue;
        }
        // 1-based, counting the header line
        let line = offset + 2;

        let length_cell = cell(row, len_idx);
        let sql_length = length_cell
            .as_integer()
            .ok_or_else(|| IngestError::InvalidValue {
                row: line,
                column: "sql_length",
                message: format!("'{}' is not an integer", length_cell.as_text()),
            })?;

        rows.push(NewSourceRow {
            sql_src: cell(row, src_idx).as_text(),
            sql_length,
            sql_modified: cell(row, modified_idx).as_text(),
        });
    }

    Ok(rows)
}

/// Reads, validates and converts an uploaded spreadsheet in one step.
pub fn load_source_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<NewSourceRow>, IngestError> {
    let sheet = reader_for(file_name)?.read(bytes)?;
    let rows = to_source_rows(&sheet)?;
    tracing::info!("Read {} source rows from {}", rows.len(), file_name);
    Ok(rows)
}

/// Reads a spreadsheet from disk, for imports that do not go through the dashboard.
pub fn load_source_file(path: &std::path::Path) -> Result<Vec<NewSourceRow>, IngestError> {
    let bytes = std::fs::read(path)?;
    load_source_rows(&path.to_string_lossy(), &bytes)
}
