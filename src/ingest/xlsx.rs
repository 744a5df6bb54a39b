use crate::ingest::{Cell, IngestError, REQUIRED_COLUMNS, Sheet, SheetReader};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_xlsxwriter::{Format, Workbook};
use std::io::Cursor;

/// Reads the first worksheet of an Excel/ODS workbook; row 1 holds the headers.
pub struct XlsxReader;

impl SheetReader for XlsxReader {
    fn read(&self, bytes: &[u8]) -> Result<Sheet, IngestError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| IngestError::ParsingError(format!("Failed to open workbook: {}", e)))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| IngestError::ParsingError("Workbook contains no sheets".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| {
                IngestError::ParsingError(format!("Failed to read sheet '{}': {}", sheet_name, e))
            })?;

        let mut rows = range.rows();
        let headers = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| to_cell(cell).as_text().trim().to_string())
                .collect(),
            None => Vec::new(),
        };

        let rows = rows
            .map(|row| row.iter().map(to_cell).collect())
            .collect();

        Ok(Sheet { headers, rows })
    }
}

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(n) => Cell::Int(*n),
        Data::Float(n) => Cell::Float(*n),
        Data::Bool(b) => Cell::Bool(*b),
        other => Cell::Text(other.to_string()),
    }
}

/// Header-only workbook offered as the upload template.
pub fn template_xlsx() -> Result<Vec<u8>, IngestError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name("sql_conversion")
        .map_err(|e| IngestError::ParsingError(e.to_string()))?;
    for (col, name) in REQUIRED_COLUMNS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *name, &header)
            .map_err(|e| IngestError::ParsingError(e.to_string()))?;
    }

    workbook
        .save_to_buffer()
        .map_err(|e| IngestError::ParsingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{to_source_rows, validate_columns};

    #[test]
    fn template_reads_back_with_required_headers() {
        let bytes = template_xlsx().unwrap();
        let sheet = XlsxReader.read(&bytes).unwrap();
        assert_eq!(sheet.headers, REQUIRED_COLUMNS.to_vec());
        assert!(sheet.rows.is_empty());
        assert!(validate_columns(&sheet).is_empty());
    }

    #[test]
    fn numeric_lengths_survive_a_workbook() {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for (col, name) in ["sql_src", "sql_length", "sql_modified", "owner"].iter().enumerate() {
            worksheet.write_string(0, col as u16, *name).unwrap();
        }
        worksheet.write_string(1, 0, "SELECT 1 FROM DUAL").unwrap();
        worksheet.write_number(1, 1, 19).unwrap();
        worksheet.write_string(1, 2, "SELECT 1 FROM DUAL").unwrap();
        worksheet.write_string(1, 3, "ops").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let sheet = XlsxReader.read(&bytes).unwrap();
        let rows = to_source_rows(&sheet).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sql_length, 19);
        assert_eq!(rows[0].sql_modified, "SELECT 1 FROM DUAL");
    }

    #[test]
    fn garbage_bytes_are_a_parsing_error() {
        assert!(matches!(
            XlsxReader.read(b"not a workbook"),
            Err(IngestError::ParsingError(_))
        ));
    }
}
