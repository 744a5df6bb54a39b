use crate::ingest::{Cell, IngestError, REQUIRED_COLUMNS, Sheet, SheetReader};

pub struct CsvReader {
    delimiter: u8,
}

impl CsvReader {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for CsvReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetReader for CsvReader {
    fn read(&self, bytes: &[u8]) -> Result<Sheet, IngestError> {
        let bytes = bytes.strip_prefix("\u{feff}".as_bytes()).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers = reader
            .headers()
            .map_err(|e| IngestError::ParsingError(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| IngestError::ParsingError(e.to_string()))?;
            rows.push(
                record
                    .iter()
                    .map(|value| {
                        if value.is_empty() {
                            Cell::Empty
                        } else {
                            Cell::Text(value.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Ok(Sheet { headers, rows })
    }
}

/// Header-only CSV template.
pub fn template_csv() -> Result<Vec<u8>, IngestError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(REQUIRED_COLUMNS)
        .map_err(|e| IngestError::ParsingError(e.to_string()))?;
    writer
        .into_inner()
        .map_err(|e| IngestError::ParsingError(e.to_string()))
}
