//! SQL text shared by the PostgreSQL and DuckDB stores.
//!
//! Both engines accept `$n` placeholders, so only the DDL differs.

use crate::db::StoreError;
use regex::Regex;
use std::sync::LazyLock;

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

/// Source and result table names, checked once so they can be spliced into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub source: String,
    pub result: String,
}

impl Tables {
    pub fn new(source: &str, result: &str) -> Result<Self, StoreError> {
        for name in [source, result] {
            if !TABLE_NAME.is_match(name) {
                return Err(StoreError::Config(format!("invalid table name: {}", name)));
            }
        }
        Ok(Self {
            source: source.to_string(),
            result: result.to_string(),
        })
    }

    /// Schemas named by qualified table names, deduplicated.
    pub fn schemas(&self) -> Vec<&str> {
        let mut schemas: Vec<&str> = [&self.source, &self.result]
            .iter()
            .filter_map(|t| t.split_once('.').map(|(schema, _)| schema))
            .collect();
        schemas.dedup();
        schemas
    }

    /// True when either table is missing. Takes the source and result names
    /// as `$1` and `$2`, resolved with the session's search path.
    pub fn postgres_tables_missing(&self) -> &'static str {
        "SELECT to_regclass($1::text) IS NULL OR to_regclass($2::text) IS NULL"
    }

    pub fn postgres_ddl(&self) -> String {
        let mut ddl = self.schema_ddl();
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {src} (
                id BIGSERIAL PRIMARY KEY,
                sql_src TEXT,
                sql_length BIGINT,
                sql_modified TEXT
            );
            {result}",
            src = self.source,
            result = self.result_ddl(),
        ));
        ddl
    }

    pub fn duckdb_ddl(&self) -> String {
        let mut ddl = self.schema_ddl();
        let sequence = format!("{}_id_seq", self.source);
        ddl.push_str(&format!(
            "CREATE SEQUENCE IF NOT EXISTS {seq};
            CREATE TABLE IF NOT EXISTS {src} (
                id BIGINT PRIMARY KEY DEFAULT nextval('{seq}'),
                sql_src TEXT,
                sql_length BIGINT,
                sql_modified TEXT
            );
            {result}",
            seq = sequence,
            src = self.source,
            result = self.result_ddl(),
        ));
        ddl
    }

    fn schema_ddl(&self) -> String {
        self.schemas()
            .iter()
            .map(|schema| format!("CREATE SCHEMA IF NOT EXISTS {};\n", schema))
            .collect()
    }

    fn result_ddl(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                pass_no BIGINT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                response TEXT,
                src_obj_id TEXT NOT NULL
            );",
            self.result
        )
    }

    pub fn insert_source(&self) -> String {
        format!(
            "INSERT INTO {} (sql_src, sql_length, sql_modified) VALUES ($1, $2, $3) RETURNING id",
            self.source
        )
    }

    pub fn select_sources(&self) -> String {
        format!(
            "SELECT id, sql_src, sql_length, sql_modified FROM {} ORDER BY id",
            self.source
        )
    }

    pub fn next_pass(&self) -> String {
        format!(
            "SELECT CAST(COALESCE(MAX(pass_no), 0) + 1 AS BIGINT) FROM {} WHERE src_obj_id = $1",
            self.result
        )
    }

    pub fn insert_result(&self) -> String {
        format!(
            "INSERT INTO {} (pass_no, created_at, response, src_obj_id) VALUES ($1, $2, $3, $4)",
            self.result
        )
    }

    /// Latest pass per source id, joined back to the pre-cleaned SQL.
    pub fn select_verification_pairs(&self) -> String {
        format!(
            "SELECT s.id, s.sql_modified, r.response
             FROM {src} s
             JOIN (
                 SELECT src_obj_id, response,
                        ROW_NUMBER() OVER (
                            PARTITION BY src_obj_id
                            ORDER BY pass_no DESC, created_at DESC
                        ) AS rn
                 FROM {result}
             ) r ON CAST(r.src_obj_id AS BIGINT) = s.id AND r.rn = 1
             ORDER BY s.id",
            src = self.source,
            result = self.result,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_injection_in_table_names() {
        assert!(Tables::new("sql_obj_dtl; DROP TABLE x", "r").is_err());
        assert!(Tables::new("a.b.c", "r").is_err());
        assert!(Tables::new("scai_iv.ais_sql_obj_dtl", "scai_iv.ais_chg_item").is_ok());
    }

    #[test]
    fn qualified_names_create_their_schema_once() {
        let tables = Tables::new("scai_iv.src", "scai_iv.res").unwrap();
        assert_eq!(tables.schemas(), vec!["scai_iv"]);
        assert_eq!(
            tables.postgres_ddl().matches("CREATE SCHEMA IF NOT EXISTS scai_iv;").count(),
            1
        );

        let plain = Tables::new("src", "res").unwrap();
        assert!(plain.schemas().is_empty());
        assert!(!plain.duckdb_ddl().contains("CREATE SCHEMA"));
    }

    #[test]
    fn existence_check_needs_no_create_privilege() {
        let tables = Tables::new("scai_iv.src", "scai_iv.res").unwrap();
        let check = tables.postgres_tables_missing();
        assert!(check.contains("to_regclass($1::text)"));
        assert!(check.contains("to_regclass($2::text)"));
        assert!(!check.contains("CREATE"));
    }
}
