//! CSV importer
//!
//! Converts a CSV file into a fresh SQLite database: cleans and
//! deduplicates column names, infers column types (a column where at least
//! 80% of non-empty values parse numerically becomes INTEGER/REAL), loads
//! all rows in one transaction, then writes an auto-generated context file
//! for the new table. Table/term descriptions come from the LLM when it is
//! reachable and degrade to generic labels when it is not.

use crate::context_store::{
    BusinessTerm, ContextStore, DatabaseContext, FieldMapping, TableContextEntry,
};
use crate::error::{DataProxyError, Result};
use crate::llm::{CallOptions, LlmClient};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Share of non-empty values that must parse numerically for a column to
/// be stored as INTEGER/REAL.
const NUMERIC_THRESHOLD: f64 = 0.8;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w]+").unwrap();
    static ref LEADING_DIGITS: Regex = Regex::new(r"^[0-9]+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub database_path: PathBuf,
    pub table_name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub context_path: PathBuf,
}

pub struct CsvImporter<'a> {
    context_store: &'a ContextStore,
}

impl<'a> CsvImporter<'a> {
    pub fn new(context_store: &'a ContextStore) -> Self {
        Self { context_store }
    }

    /// Import a CSV file into `<output_dir>/<stem>.db` and write the
    /// matching context file.
    pub async fn import(
        &self,
        csv_path: &Path,
        output_dir: &Path,
        llm: &LlmClient,
    ) -> Result<ImportSummary> {
        info!("importing CSV file: {}", csv_path.display());

        let (columns, rows) = read_csv(csv_path)?;
        if columns.is_empty() {
            return Err(DataProxyError::Import("CSV文件没有列".to_string()));
        }

        let column_types: Vec<ColumnType> = (0..columns.len())
            .map(|i| infer_column_type(&rows, i))
            .collect();

        let stem = csv_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "imported".to_string());
        let table_name = clean_identifier(&stem, "table");

        std::fs::create_dir_all(output_dir)?;
        let database_path = output_dir.join(format!("{}.db", table_name));

        write_table(&database_path, &table_name, &columns, &column_types, &rows)?;
        info!(
            "imported {} rows into {} ({})",
            rows.len(),
            table_name,
            database_path.display()
        );

        let context = self
            .build_context(&table_name, &columns, llm)
            .await;
        self.context_store.save(&database_path, &context)?;

        Ok(ImportSummary {
            context_path: self.context_store.context_path(&database_path),
            database_path,
            table_name,
            row_count: rows.len(),
            column_count: columns.len(),
        })
    }

    /// Auto-generate the context for a freshly imported table. LLM output
    /// is best-effort; every failure degrades to generic labels.
    async fn build_context(
        &self,
        table_name: &str,
        columns: &[String],
        llm: &LlmClient,
    ) -> DatabaseContext {
        let description = describe_table(llm, table_name).await;

        let mut tables = BTreeMap::new();
        tables.insert(
            table_name.to_string(),
            TableContextEntry {
                description,
                fields: columns.to_vec(),
            },
        );

        let mut field_mappings: BTreeMap<String, FieldMapping> = BTreeMap::new();
        for column in columns {
            let meaning = crate::schema::describe_field(llm, column).await;
            field_mappings.insert(
                column.clone(),
                FieldMapping {
                    column: column.clone(),
                    chinese_name: Some(meaning),
                },
            );
        }

        DatabaseContext {
            tables,
            business_terms: suggest_terms(llm, table_name, columns).await,
            field_mappings,
            query_scope_rules: Vec::new(),
            updated_at: String::new(),
        }
    }
}

fn read_csv(csv_path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_path)
        .map_err(|e| DataProxyError::Import(format!("无法读取CSV文件: {}", e)))?;

    let headers = reader
        .headers()
        .map_err(|e| DataProxyError::Import(format!("无法读取CSV表头: {}", e)))?
        .clone();

    let mut columns: Vec<String> = headers
        .iter()
        .map(|h| clean_identifier(h, "column"))
        .collect();
    dedupe_columns(&mut columns);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DataProxyError::Import(format!("CSV行解析失败: {}", e)))?;
        let mut row: Vec<String> = record.iter().map(|f| f.trim().to_string()).collect();
        row.resize(columns.len(), String::new());
        rows.push(row);
    }

    Ok((columns, rows))
}

/// Keep word characters (covers CJK), strip leading digits, never empty.
fn clean_identifier(raw: &str, fallback: &str) -> String {
    let cleaned = NON_WORD.replace_all(raw.trim(), "_");
    let cleaned = LEADING_DIGITS.replace(&cleaned, "");
    let cleaned = cleaned.trim_matches('_');

    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

fn dedupe_columns(columns: &mut [String]) {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for column in columns.iter_mut() {
        match seen.get_mut(column.as_str()) {
            Some(count) => {
                *count += 1;
                *column = format!("{}_{}", column, count);
            }
            None => {
                seen.insert(column.clone(), 0);
            }
        }
    }
}

fn infer_column_type(rows: &[Vec<String>], index: usize) -> ColumnType {
    let values: Vec<&String> = rows
        .iter()
        .filter_map(|r| r.get(index))
        .filter(|v| !v.is_empty())
        .collect();

    if values.is_empty() {
        return ColumnType::Text;
    }

    let numeric = values.iter().filter(|v| v.parse::<f64>().is_ok()).count();
    if (numeric as f64) < values.len() as f64 * NUMERIC_THRESHOLD {
        return ColumnType::Text;
    }

    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else {
        ColumnType::Real
    }
}

fn write_table(
    database_path: &Path,
    table_name: &str,
    columns: &[String],
    column_types: &[ColumnType],
    rows: &[Vec<String>],
) -> Result<()> {
    let mut conn = Connection::open(database_path)
        .map_err(|e| DataProxyError::Import(format!("无法创建数据库: {}", e)))?;

    let column_defs: Vec<String> = columns
        .iter()
        .zip(column_types)
        .map(|(name, ty)| format!("\"{}\" {}", name, ty.sql_name()))
        .collect();

    conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table_name), [])
        .map_err(|e| DataProxyError::Import(format!("建表失败: {}", e)))?;
    conn.execute(
        &format!(
            "CREATE TABLE \"{}\" ({})",
            table_name,
            column_defs.join(", ")
        ),
        [],
    )
    .map_err(|e| DataProxyError::Import(format!("建表失败: {}", e)))?;

    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let insert_sql = format!(
        "INSERT INTO \"{}\" VALUES ({})",
        table_name,
        placeholders.join(", ")
    );

    let tx = conn
        .transaction()
        .map_err(|e| DataProxyError::Import(format!("导入事务失败: {}", e)))?;
    {
        let mut stmt = tx
            .prepare(&insert_sql)
            .map_err(|e| DataProxyError::Import(format!("导入事务失败: {}", e)))?;

        for row in rows {
            let params: Vec<rusqlite::types::Value> = row
                .iter()
                .zip(column_types)
                .map(|(value, ty)| typed_value(value, *ty))
                .collect();
            stmt.execute(rusqlite::params_from_iter(params))
                .map_err(|e| DataProxyError::Import(format!("数据写入失败: {}", e)))?;
        }
    }
    tx.commit()
        .map_err(|e| DataProxyError::Import(format!("导入事务失败: {}", e)))?;

    Ok(())
}

fn typed_value(value: &str, ty: ColumnType) -> rusqlite::types::Value {
    use rusqlite::types::Value;

    if value.is_empty() {
        return Value::Null;
    }

    match ty {
        ColumnType::Integer => value
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or(Value::Null),
        ColumnType::Real => value.parse::<f64>().map(Value::Real).unwrap_or(Value::Null),
        ColumnType::Text => Value::Text(value.to_string()),
    }
}

/// One-line business description of the table, LLM-first.
async fn describe_table(llm: &LlmClient, table_name: &str) -> String {
    let prompt = format!(
        r#"你是银行业务数据专家。请分析表名的业务用途。

表名: {}

要求：
- 只返回简洁的业务用途描述（不超过15字）
- 不要解释分析过程

请返回表的业务用途："#,
        table_name
    );

    match llm.call(&prompt, &CallOptions::sql_generation()).await {
        Ok(response) => {
            let purpose: String = response.trim().chars().take(30).collect();
            if purpose.is_empty() {
                crate::schema::generic_table_label()
            } else {
                purpose
            }
        }
        Err(e) => {
            warn!("LLM table description failed: {}", e);
            crate::schema::generic_table_label()
        }
    }
}

/// Best-effort business-term suggestions for the imported columns.
async fn suggest_terms(
    llm: &LlmClient,
    table_name: &str,
    columns: &[String],
) -> BTreeMap<String, BusinessTerm> {
    let prompt = format!(
        r#"你是银行业务数据专家。数据表 {} 包含以下字段: {}

请为该表建议最多3个常用业务术语，每个术语给出定义和SQL过滤条件。

请返回JSON格式：
{{
  "术语名称": {{"definition": "定义", "sql_condition": "SQL条件"}}
}}

只返回JSON，不要其他解释："#,
        table_name,
        columns.join(", ")
    );

    match llm.call(&prompt, &CallOptions::import_analysis()).await {
        Ok(response) => {
            let cleaned = response
                .trim()
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim()
                .to_string();
            match serde_json::from_str::<BTreeMap<String, BusinessTerm>>(&cleaned) {
                Ok(terms) => terms,
                Err(_) => {
                    warn!("LLM term suggestions unparseable, importing without terms");
                    BTreeMap::new()
                }
            }
        }
        Err(e) => {
            warn!("LLM term suggestion failed: {}", e);
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_identifiers() {
        assert_eq!(clean_identifier("客户 名称", "column"), "客户_名称");
        assert_eq!(clean_identifier("2024balance", "column"), "balance");
        assert_eq!(clean_identifier("!!!", "column"), "column");
        assert_eq!(clean_identifier("cust-id", "column"), "cust_id");
    }

    #[test]
    fn dedupes_repeated_columns() {
        let mut columns = vec!["a".to_string(), "a".to_string(), "a".to_string()];
        dedupe_columns(&mut columns);
        assert_eq!(columns, vec!["a", "a_1", "a_2"]);
    }

    #[test]
    fn infers_types_with_threshold() {
        let rows: Vec<Vec<String>> = vec![
            vec!["1".into(), "1.5".into(), "x".into(), "10".into()],
            vec!["2".into(), "2.5".into(), "y".into(), "oops".into()],
            vec!["3".into(), "3".into(), "z".into(), "30".into()],
            vec!["4".into(), "".into(), "w".into(), "40".into()],
            vec!["5".into(), "5.1".into(), "v".into(), "50".into()],
        ];

        assert_eq!(infer_column_type(&rows, 0), ColumnType::Integer);
        assert_eq!(infer_column_type(&rows, 1), ColumnType::Real);
        assert_eq!(infer_column_type(&rows, 2), ColumnType::Text);
        // 4 of 5 parse → above the 80% threshold
        assert_eq!(infer_column_type(&rows, 3), ColumnType::Real);
    }
}
