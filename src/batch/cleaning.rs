//! Strips chat-template leakage (role labels, code fences, escaped newlines)
//! from decoded model output.

use regex::Regex;
use std::sync::LazyLock;

static ASSISTANT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^assistant\b[ \t]*[:：>.,\-–—]*\s*").expect("valid regex")
});

static FENCE_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    // a language tag ends at a newline or end of input, or is a known SQL
    // dialect followed by code on the same line
    Regex::new(
        r"^```(?:[A-Za-z0-9_+.\-]*[ \t]*(?:\r?\n|$)|(?i:sql|postgresql|postgres|pgsql|plpgsql|plsql)[ \t]+)?",
    )
    .expect("valid regex")
});

static FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```\s*$").expect("valid regex"));

/// One ordered pass of the pipeline.
fn clean_pass(text: &str) -> String {
    let mut s = text.strip_prefix('\u{feff}').unwrap_or(text);
    s = s.trim_start();
    while let Some(rest) = s.strip_prefix("\\n") {
        s = rest;
    }
    s = s.trim_start_matches(['\n', '\r']);

    let s = ASSISTANT_LABEL.replace(s, "");
    let s = FENCE_OPEN.replace(&s, "");
    let s = FENCE_CLOSE.replace(&s, "");
    s.trim().to_string()
}

/// Cleans a raw model response.
///
/// The pass is repeated until nothing changes. If that would erase
/// everything, the last non-empty stage is returned instead, starting from
/// the trimmed original. Every stage is stable under the remaining passes, so
/// cleaning a cleaned string is a no-op.
pub fn clean_response_text(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        // every pass only removes characters, so this terminates
        let next = clean_pass(&current);
        if next.is_empty() || next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_block() {
        assert_eq!(clean_response_text("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(clean_response_text("```\nSELECT 1;\n```\n"), "SELECT 1;");
    }

    #[test]
    fn strips_role_label_and_escaped_newlines() {
        assert_eq!(
            clean_response_text("\u{feff}  \\n\\nassistant:\n```postgresql\nSELECT now();\n```"),
            "SELECT now();"
        );
        assert_eq!(clean_response_text("ASSISTANT - SELECT 1;"), "SELECT 1;");
    }

    #[test]
    fn keeps_identifiers_that_start_with_assistant() {
        assert_eq!(
            clean_response_text("assistant_id FROM t"),
            "assistant_id FROM t"
        );
    }

    #[test]
    fn leaves_plain_sql_alone() {
        let sql = "SELECT a.col1\nFROM tab_a a\nLIMIT 1;";
        assert_eq!(clean_response_text(sql), sql);
    }

    #[test]
    fn falls_back_to_trimmed_original_when_everything_is_stripped() {
        assert_eq!(clean_response_text("  ```sql\n```  "), "```sql\n```");
        assert_eq!(clean_response_text("assistant"), "assistant");
        assert_eq!(clean_response_text(" \n\t "), "");
    }

    #[test]
    fn never_empty_unless_original_is_blank() {
        let samples = [
            "```",
            "\\n",
            "assistant:",
            "\u{feff}",
            "```sql\n\n```",
            "x",
            "assistant\n```sql\nSELECT 1;\n```",
        ];
        for sample in samples {
            let cleaned = clean_response_text(sample);
            assert_eq!(cleaned.is_empty(), sample.trim().is_empty(), "{:?}", sample);
        }
    }

    #[test]
    fn strips_bare_or_inline_language_tags() {
        assert_eq!(clean_response_text("```sql SELECT 1;```"), "SELECT 1;");
        assert_eq!(clean_response_text("```SELECT 1```"), "SELECT 1");
        assert_eq!(clean_response_text("   ```sql\n"), "```sql");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let fragments = [
            " ", "\n", "\\n", "assistant", ":", "```", "sql", "```sql\n", "\n```", "x",
            "ASSISTANT: ", "\t", "\u{feff}",
        ];
        let n = fragments.len();
        let mut checked = 0;
        for a in 0..n {
            for b in 0..n {
                for c in 0..n {
                    for d in 0..n {
                        let sample =
                            [fragments[a], fragments[b], fragments[c], fragments[d]].concat();
                        let once = clean_response_text(&sample);
                        assert_eq!(clean_response_text(&once), once, "{:?}", sample);
                        assert_eq!(once.is_empty(), sample.trim().is_empty(), "{:?}", sample);
                        checked += 1;
                    }
                }
            }
        }
        assert_eq!(checked, n.pow(4));
    }
}
