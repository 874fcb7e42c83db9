//! SQL Extractor / Sanitizer
//!
//! Pulls the first plausible `SELECT` statement out of raw LLM text using
//! an ordered list of regex patterns, then cleans it up for execution.
//! Validation is deliberately shallow (non-empty, minimum length, SELECT
//! prefix); the LLM-to-SQL channel is trusted beyond that.

use lazy_static::lazy_static;
use regex::Regex;

/// Minimum trimmed length for a candidate statement.
const MIN_SQL_LENGTH: usize = 10;

lazy_static! {
    /// Ordered extraction patterns: fenced ```sql block, fenced block
    /// starting with SELECT, "SQL:" prefix line, bare SELECT span.
    static ref EXTRACTION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?is)```sql\s*(.*?)\s*```").unwrap(),
        Regex::new(r"(?is)```\s*(SELECT.*?)\s*```").unwrap(),
        Regex::new(r"(?is)SQL\s*[:：]\s*(SELECT.*?)(?:\n|$)").unwrap(),
        Regex::new(r"(?is)(SELECT.*?)(?:\n\n|$)").unwrap(),
    ];

    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref FENCE_MARKER: Regex = Regex::new(r"```sql|```").unwrap();
}

/// Extract the first valid SELECT statement from an LLM response.
/// Returns `None` when no pattern yields a valid statement.
pub fn extract_sql(response: &str) -> Option<String> {
    if response.trim().is_empty() {
        return None;
    }

    for pattern in EXTRACTION_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(response) {
            if let Some(matched) = captures.get(1) {
                let sql = matched.as_str().trim();
                if is_valid_sql(sql) {
                    return Some(sql.to_string());
                }
            }
        }
    }

    None
}

/// Shallow validity check: long enough and SELECT-prefixed.
pub fn is_valid_sql(sql: &str) -> bool {
    let trimmed = sql.trim();
    trimmed.len() >= MIN_SQL_LENGTH && trimmed.to_uppercase().starts_with("SELECT")
}

/// Strip markdown fences and `--` comments, collapse whitespace, ensure a
/// trailing semicolon.
pub fn clean_sql(sql: &str) -> String {
    let without_fences = FENCE_MARKER.replace_all(sql, "");
    let without_comments = LINE_COMMENT.replace_all(&without_fences, "");

    let mut cleaned = without_comments
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if !cleaned.is_empty() && !cleaned.ends_with(';') {
        cleaned.push(';');
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_sql_block_verbatim() {
        let response = "这是查询语句：\n```sql\nSELECT name, balance FROM cust_info WHERE balance > 0\n```\n希望对你有帮助。";
        let sql = extract_sql(response).unwrap();
        assert_eq!(sql, "SELECT name, balance FROM cust_info WHERE balance > 0");
    }

    #[test]
    fn extracts_plain_fenced_block_with_select() {
        let response = "```\nSELECT COUNT(*) FROM loans\n```";
        let sql = extract_sql(response).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM loans");
    }

    #[test]
    fn extracts_sql_prefix_line() {
        let response = "SQL: SELECT cust_id FROM cust_info LIMIT 10\n其余说明。";
        let sql = extract_sql(response).unwrap();
        assert!(sql.starts_with("SELECT cust_id"));
    }

    #[test]
    fn extracts_bare_select() {
        let response = "SELECT a, b FROM t WHERE a > 1";
        assert_eq!(extract_sql(response).unwrap(), response);
    }

    #[test]
    fn returns_none_without_select() {
        assert_eq!(extract_sql("抱歉，我无法生成该查询。"), None);
        assert_eq!(extract_sql(""), None);
    }

    #[test]
    fn rejects_too_short_statements() {
        assert_eq!(extract_sql("SELECT 1"), None);
    }

    #[test]
    fn clean_strips_comments_and_appends_semicolon() {
        let sql = "SELECT a, -- the key\n  b\nFROM t";
        assert_eq!(clean_sql(sql), "SELECT a, b FROM t;");
    }

    #[test]
    fn clean_keeps_existing_semicolon() {
        assert_eq!(clean_sql("SELECT 1 AS x;"), "SELECT 1 AS x;");
    }

    #[test]
    fn clean_removes_fence_markers() {
        assert_eq!(clean_sql("```sql SELECT 1 AS x ```"), "SELECT 1 AS x;");
    }
}
