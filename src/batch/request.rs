use crate::db::models::{SourceRow, VerificationPair};
use crate::llm::models::GenerationOptions;
use serde::{Deserialize, Serialize};

/// Body of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub question: String,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub oracle_sql: String,
    pub pg_sql: String,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

/// Options are expected to be validated already.
pub fn build_request(row: &SourceRow, options: &GenerationOptions) -> ConversionRequest {
    ConversionRequest {
        question: row.sql_modified.clone(),
        options: *options,
    }
}

pub fn build_verify_request(pair: &VerificationPair, options: &GenerationOptions) -> VerifyRequest {
    VerifyRequest {
        oracle_sql: pair.oracle_sql.clone(),
        pg_sql: pair.pg_sql.clone(),
        options: *options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_comes_from_the_modified_sql() {
        let row = SourceRow {
            id: 7,
            sql_src: "select /*+ hint */ 1 from dual".to_string(),
            sql_length: 30,
            sql_modified: "SELECT 1 FROM DUAL".to_string(),
        };
        let options = GenerationOptions {
            top_k: Some(20),
            ..Default::default()
        };

        let body = serde_json::to_value(build_request(&row, &options)).unwrap();
        assert_eq!(body["question"], "SELECT 1 FROM DUAL");
        assert_eq!(body["max_new_tokens"], 1024);
        assert_eq!(body["top_k"], 20);
        assert!(body.get("repetition_penalty").is_none());
        assert_eq!(body["do_sample"], true);
    }

    #[test]
    fn verify_request_is_flat() {
        let pair = VerificationPair {
            id: 1,
            oracle_sql: "SELECT NVL(a, 0) FROM t".to_string(),
            pg_sql: "SELECT COALESCE(a, 0) FROM t".to_string(),
        };
        let body = serde_json::to_value(build_verify_request(&pair, &GenerationOptions::default()))
            .unwrap();
        assert_eq!(body["oracle_sql"], "SELECT NVL(a, 0) FROM t");
        assert_eq!(body["pg_sql"], "SELECT COALESCE(a, 0) FROM t");
        assert_eq!(body["top_p"].as_f64().map(|v| (v * 10.0).round()), Some(8.0));
    }
}
