use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A spreadsheet row that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSourceRow {
    pub sql_src: String,
    pub sql_length: i64,
    pub sql_modified: String,
}

/// One Oracle statement staged for conversion, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub id: i64,
    pub sql_src: String,
    pub sql_length: i64,
    pub sql_modified: String,
}

impl SourceRow {
    pub fn from_new(id: i64, row: NewSourceRow) -> Self {
        Self {
            id,
            sql_src: row.sql_src,
            sql_length: row.sql_length,
            sql_modified: row.sql_modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewConversionResult {
    pub src_obj_id: i64,
    pub response: String,
    pub created_at: NaiveDateTime,
}

/// One conversion pass for a source row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub src_obj_id: i64,
    pub pass_no: i64,
    pub response: String,
    pub created_at: NaiveDateTime,
    /// Still empty after every retry. Kept in memory only.
    pub degraded: bool,
}

/// A source row's pre-cleaned SQL paired with its latest conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationPair {
    pub id: i64,
    pub oracle_sql: String,
    pub pg_sql: String,
}
