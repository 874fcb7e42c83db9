//! Query Executor
//!
//! Runs a SQL statement against a SQLite file and materializes every row
//! eagerly into name-addressable JSON records. A fresh connection is opened
//! per call and closed on return. Failures never cross this boundary as
//! panics or errors: the result carries `success = false` with the SQLite
//! message and a small set of remediation suggestions keyed off the message
//! text.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

pub type Record = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlQueryResult {
    pub success: bool,
    pub sql: String,
    pub columns: Vec<String>,
    pub data: Vec<Record>,
    pub record_count: usize,
    /// Wall-clock seconds spent in this call.
    pub execution_time: f64,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl SqlQueryResult {
    fn failure(sql: &str, error: String, started: Instant) -> Self {
        let suggestions = suggestions_for(&error);
        Self {
            success: false,
            sql: sql.to_string(),
            columns: Vec::new(),
            data: Vec::new(),
            record_count: 0,
            execution_time: started.elapsed().as_secs_f64(),
            error: Some(error),
            suggestions,
        }
    }
}

/// Execute `sql` against the database at `database_path`.
pub fn execute(sql: &str, database_path: &Path) -> SqlQueryResult {
    let started = Instant::now();

    if !database_path.exists() {
        return SqlQueryResult::failure(
            sql,
            format!("数据库文件不存在: {}", database_path.display()),
            started,
        );
    }

    let conn = match Connection::open(database_path) {
        Ok(conn) => conn,
        Err(e) => {
            warn!("failed to open database {}: {}", database_path.display(), e);
            return SqlQueryResult::failure(sql, format!("SQL执行失败: {}", e), started);
        }
    };

    match run_statement(&conn, sql) {
        Ok((columns, data)) => {
            debug!("SQL executed, {} records returned", data.len());
            let record_count = data.len();
            SqlQueryResult {
                success: true,
                sql: sql.to_string(),
                columns,
                data,
                record_count,
                execution_time: started.elapsed().as_secs_f64(),
                error: None,
                suggestions: Vec::new(),
            }
        }
        Err(e) => {
            warn!("SQL execution failed: {}", e);
            SqlQueryResult::failure(sql, format!("SQL执行失败: {}", e), started)
        }
    }
}

fn run_statement(
    conn: &Connection,
    sql: &str,
) -> std::result::Result<(Vec<String>, Vec<Record>), rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut data = Vec::new();

    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (i, name) in columns.iter().enumerate() {
            let value = row.get_ref(i).map(value_to_json).unwrap_or(serde_json::Value::Null);
            record.insert(name.clone(), value);
        }
        data.push(record);
    }

    Ok((columns, data))
}

/// Convert a SQLite value to JSON. BLOBs are surfaced as a length tag
/// rather than raw bytes.
pub fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}

/// Canned remediation suggestions, selected by substring-matching the
/// SQLite error message.
fn suggestions_for(error: &str) -> Vec<String> {
    let lower = error.to_lowercase();

    if lower.contains("no such table") {
        vec![
            "检查表名是否正确".to_string(),
            "尝试使用其他相关表名".to_string(),
        ]
    } else if lower.contains("no such column") {
        vec![
            "检查字段名是否正确".to_string(),
            "查看字段映射配置中的实际字段名".to_string(),
        ]
    } else if lower.contains("syntax error") {
        vec![
            "检查SQL语法是否正确".to_string(),
            "简化查询条件后重试".to_string(),
        ]
    } else if lower.contains("database is locked") {
        vec!["数据库正忙，请稍后重试".to_string()]
    } else if lower.contains("数据库文件不存在") {
        vec!["检查数据库路径或重新选择数据库".to_string()]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("dataproxy_exec_{}.db", name));
        let _ = std::fs::remove_file(&path);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t (a INTEGER, b TEXT);
             INSERT INTO t VALUES (1, 'one'), (2, 'two');",
        )
        .unwrap();
        path
    }

    #[test]
    fn select_one_as_x() {
        let path = scratch_db("one");
        let result = execute("SELECT 1 AS x", &path);

        assert!(result.success);
        assert_eq!(result.record_count, 1);
        assert_eq!(result.columns, vec!["x".to_string()]);
        assert_eq!(result.data[0]["x"], serde_json::json!(1));
    }

    #[test]
    fn invalid_sql_returns_error_without_panicking() {
        let path = scratch_db("invalid");
        let result = execute("SELEC wrong FROM nowhere", &path);

        assert!(!result.success);
        assert!(!result.error.as_deref().unwrap_or("").is_empty());
        assert_eq!(result.record_count, 0);
    }

    #[test]
    fn missing_table_gets_suggestions() {
        let path = scratch_db("missing");
        let result = execute("SELECT * FROM ghost_table", &path);

        assert!(!result.success);
        assert!(result.suggestions.iter().any(|s| s.contains("表名")));
    }

    #[test]
    fn rows_are_name_addressable() {
        let path = scratch_db("rows");
        let result = execute("SELECT a, b FROM t ORDER BY a", &path);

        assert!(result.success);
        assert_eq!(result.record_count, 2);
        assert_eq!(result.data[1]["b"], serde_json::json!("two"));
    }

    #[test]
    fn nonexistent_database_fails_cleanly() {
        let result = execute("SELECT 1", Path::new("/nonexistent/nope.db"));
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
