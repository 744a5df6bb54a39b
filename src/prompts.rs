//! Prompt text for the Oracle → PostgreSQL conversion and verification calls.

use crate::llm::models::Prompt;

pub fn translation_system() -> String {
    r#"
You are a database migration expert responsible for converting Oracle SQL into PostgreSQL (version 15).
Convert Oracle syntax into PostgreSQL syntax exactly. If there is nothing to convert, output the input unchanged.

Always follow these rules:
- Replace every Oracle-specific function, data type and operator with syntax that runs on PostgreSQL.
- Follow ANSI SQL as closely as possible; PostgreSQL-specific syntax is allowed.
- Output only the final SQL statement. Do not output anything other than SQL.
- Keep the structure of the input (column order, table layout, aliases) wherever possible.

[Example]
Oracle SQL:
SELECT A.COL1,
       B.COL2,
       (
           SELECT MAX(SCORE)
           FROM TAB_F F
           WHERE F.ID = A.ID
       ) AS MAX_SCORE,
       A.COL1 || '-' || B.COL2 AS COMBINED_VAL
FROM   TAB_A A,
       TAB_B B,
       TAB_D D
WHERE  A.ID = B.A_ID (+)
  AND  A.TYPE = B.A_TYPE (+)
  AND  A.KEY = D.A_KEY (+)
  AND  B.FLAG (+) = 'Y'
  AND  TO_DATE(#SchdDt#, 'yyyymmddhh24miss') BETWEEN B.STA_DT (+) AND B.END_DT (+)
  AND  A.STATUS = 'ACTIVE'
  AND  D.FLAG = 'Y'
  AND  ROWNUM = 1;

PostgreSQL:
SELECT
    a.col1,
    b.col2,
    (
        SELECT MAX(f.score)
        FROM tab_f f
        WHERE f.id = a.id
    ) AS max_score,
    a.col1 || '-' || b.col2 AS combined_val
FROM tab_a a
LEFT JOIN tab_b b
       ON a.id   = b.a_id
      AND a.type = b.a_type
      AND b.flag = 'Y'
      AND to_timestamp(#SchdDt#, 'YYYYMMDDHH24MISS')::timestamp
          BETWEEN b.sta_dt AND b.end_dt
JOIN tab_d d
     ON a.key  = d.a_key
    AND d.flag = 'Y'
WHERE a.status = 'ACTIVE'
LIMIT 1;
"#
    .to_string()
}

pub fn translation_user(question: &str) -> String {
    format!("ORACLE SQL:\n{}\n\nPostgreSQL:\n", question)
}

pub fn verification_system() -> String {
    r#"
You are a database migration reviewer. You receive an Oracle SQL statement and a PostgreSQL statement that
is claimed to be its translation.

Check whether the PostgreSQL statement runs on PostgreSQL 15 and returns the same result as the Oracle statement.
Pay attention to outer joins written with (+), ROWNUM, NVL/DECODE, date arithmetic and implicit type conversion.

Answer with one line "OK" if the translation is correct. Otherwise answer "NG" on the first line followed by a
short list of the problems found and a corrected PostgreSQL statement.
"#
    .to_string()
}

pub fn verification_user(oracle_sql: &str, pg_sql: &str) -> String {
    format!(
        "ORACLE SQL:\n{}\n\nPostgreSQL:\n{}\n\nReview:\n",
        oracle_sql, pg_sql
    )
}

/// Prompt for a conversion call; caller overrides replace either half.
pub fn translation_prompt(
    question: &str,
    system_override: Option<&str>,
    user_override: Option<&str>,
) -> Prompt {
    Prompt {
        system: system_override
            .map(str::to_string)
            .unwrap_or_else(translation_system),
        user: user_override
            .map(str::to_string)
            .unwrap_or_else(|| translation_user(question)),
    }
}

pub fn verification_prompt(oracle_sql: &str, pg_sql: &str) -> Prompt {
    Prompt {
        system: verification_system(),
        user: verification_user(oracle_sql, pg_sql),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_embeds_question() {
        let user = translation_user("SELECT SYSDATE FROM DUAL");
        assert!(user.starts_with("ORACLE SQL:\nSELECT SYSDATE FROM DUAL\n"));
        assert!(user.trim_end().ends_with("PostgreSQL:"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let prompt = translation_prompt("q", Some("custom system"), None);
        assert_eq!(prompt.system, "custom system");
        assert_eq!(prompt.user, translation_user("q"));

        let prompt = translation_prompt("q", None, Some("custom user"));
        assert_eq!(prompt.system, translation_system());
        assert_eq!(prompt.user, "custom user");
    }

    #[test]
    fn verification_prompt_carries_both_statements() {
        let prompt = verification_prompt("SELECT NVL(a, 0) FROM t", "SELECT COALESCE(a, 0) FROM t");
        assert!(prompt.user.contains("NVL(a, 0)"));
        assert!(prompt.user.contains("COALESCE(a, 0)"));
    }
}
