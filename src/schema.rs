//! Schema Introspector
//!
//! Reads table/column metadata, row counts and a few sample rows from a
//! SQLite file, plus foreign-key and name-inferred relationships between
//! tables. Results are cached in a bounded LRU keyed by canonical database
//! path; the cache is invalidated explicitly on database switch and import.
//!
//! Business classification (database domain, column buckets) is delegated
//! to the LLM and always degrades to rule-based heuristics instead of
//! failing.

use crate::error::{DataProxyError, Result};
use crate::executor::value_to_json;
use crate::llm::{CallOptions, LlmClient};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Sample rows fetched per table.
const SAMPLE_ROW_LIMIT: usize = 3;
/// Long text values in samples are cut at this many characters.
const SAMPLE_VALUE_MAX_CHARS: usize = 50;
/// Columns listed per table in prompt schema text.
const PROMPT_COLUMN_LIMIT: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
    pub sample_rows: Vec<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub relationship_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub database_path: String,
    pub tables: BTreeMap<String, TableSchema>,
    pub relationships: Vec<Relationship>,
}

impl DatabaseSchema {
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// Column buckets used when presenting a table to the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldBuckets {
    pub key_fields: Vec<String>,
    pub business_fields: Vec<String>,
    pub other_fields: Vec<String>,
}

/// Bounded LRU over introspected schemas. HashMap for storage, VecDeque
/// for recency order; eviction pops the back.
struct SchemaCache {
    data: HashMap<String, DatabaseSchema>,
    access_order: VecDeque<String>,
    max_size: usize,
}

impl SchemaCache {
    fn new(max_size: usize) -> Self {
        Self {
            data: HashMap::new(),
            access_order: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    fn get(&mut self, key: &str) -> Option<DatabaseSchema> {
        if self.data.contains_key(key) {
            self.access_order.retain(|k| k != key);
            self.access_order.push_front(key.to_string());
            self.data.get(key).cloned()
        } else {
            None
        }
    }

    fn put(&mut self, key: String, value: DatabaseSchema) {
        if self.data.contains_key(&key) {
            self.access_order.retain(|k| k != &key);
        } else if self.data.len() >= self.max_size {
            if let Some(lru_key) = self.access_order.pop_back() {
                self.data.remove(&lru_key);
            }
        }

        self.access_order.push_front(key.clone());
        self.data.insert(key, value);
    }

    fn pop(&mut self, key: &str) -> Option<DatabaseSchema> {
        self.access_order.retain(|k| k != key);
        self.data.remove(key)
    }
}

pub struct SchemaIntrospector {
    cache: Mutex<SchemaCache>,
}

impl SchemaIntrospector {
    const DEFAULT_CACHE_SIZE: usize = 16;

    pub fn new() -> Self {
        Self::with_cache_size(Self::DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(max_size: usize) -> Self {
        Self {
            cache: Mutex::new(SchemaCache::new(max_size)),
        }
    }

    /// Introspect all user tables of a SQLite file. Cached per canonical
    /// path; pass `use_cache = false` to force a re-read.
    pub fn introspect(&self, database_path: &Path, use_cache: bool) -> Result<DatabaseSchema> {
        let key = cache_key(database_path);

        if use_cache {
            let mut cache = self.cache.lock().unwrap();
            if let Some(schema) = cache.get(&key) {
                debug!("schema cache hit: {}", key);
                return Ok(schema);
            }
        }

        info!("introspecting database schema: {}", database_path.display());
        let schema = read_database_schema(database_path)?;

        let mut cache = self.cache.lock().unwrap();
        cache.put(key, schema.clone());

        Ok(schema)
    }

    /// Drop a cached entry, e.g. after a switch or import touched the file.
    pub fn invalidate(&self, database_path: &Path) {
        let key = cache_key(database_path);
        let mut cache = self.cache.lock().unwrap();
        if cache.pop(&key).is_some() {
            debug!("schema cache invalidated: {}", key);
        }
    }
}

impl Default for SchemaIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(database_path: &Path) -> String {
    database_path
        .canonicalize()
        .unwrap_or_else(|_| database_path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn read_database_schema(database_path: &Path) -> Result<DatabaseSchema> {
    if !database_path.exists() {
        return Err(DataProxyError::Schema(format!(
            "数据库文件不存在: {}",
            database_path.display()
        )));
    }

    let conn = Connection::open(database_path)
        .map_err(|e| DataProxyError::Schema(format!("Failed to open database: {}", e)))?;

    let table_names = list_user_tables(&conn)?;

    let mut tables = BTreeMap::new();
    for table_name in &table_names {
        match read_table_schema(&conn, table_name) {
            Ok(table) => {
                tables.insert(table_name.clone(), table);
            }
            Err(e) => warn!("failed to read schema for table {}: {}", table_name, e),
        }
    }

    let relationships = read_relationships(&conn, &table_names);

    Ok(DatabaseSchema {
        database_path: database_path.to_string_lossy().to_string(),
        tables,
        relationships,
    })
}

fn list_user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
        .map_err(|e| DataProxyError::Schema(format!("Failed to list tables: {}", e)))?;

    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| DataProxyError::Schema(format!("Failed to list tables: {}", e)))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(names)
}

fn read_table_schema(conn: &Connection, table_name: &str) -> Result<TableSchema> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", table_name))
        .map_err(|e| DataProxyError::Schema(format!("PRAGMA table_info failed: {}", e)))?;

    let columns: Vec<ColumnInfo> = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(3)? != 0,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })
        .map_err(|e| DataProxyError::Schema(format!("PRAGMA table_info failed: {}", e)))?
        .filter_map(|r| r.ok())
        .collect();

    let row_count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table_name),
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let sample_rows = read_sample_rows(conn, table_name).unwrap_or_else(|e| {
        warn!("failed to sample table {}: {}", table_name, e);
        Vec::new()
    });

    Ok(TableSchema {
        name: table_name.to_string(),
        columns,
        row_count,
        sample_rows,
    })
}

fn read_sample_rows(
    conn: &Connection,
    table_name: &str,
) -> Result<Vec<BTreeMap<String, serde_json::Value>>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT * FROM \"{}\" LIMIT {}",
            table_name, SAMPLE_ROW_LIMIT
        ))
        .map_err(|e| DataProxyError::Schema(format!("Failed to sample table: {}", e)))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| DataProxyError::Schema(format!("Failed to sample table: {}", e)))?;

    let mut samples = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| DataProxyError::Schema(format!("Failed to sample table: {}", e)))?
    {
        let mut record = BTreeMap::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = row
                .get_ref(i)
                .map(value_to_json)
                .unwrap_or(serde_json::Value::Null);
            record.insert(name.clone(), truncate_sample_value(value));
        }
        samples.push(record);
    }

    Ok(samples)
}

fn truncate_sample_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) if s.chars().count() > SAMPLE_VALUE_MAX_CHARS => {
            let truncated: String = s.chars().take(SAMPLE_VALUE_MAX_CHARS).collect();
            serde_json::Value::String(format!("{}...", truncated))
        }
        other => other,
    }
}

fn read_relationships(conn: &Connection, table_names: &[String]) -> Vec<Relationship> {
    let mut relationships = Vec::new();

    // Declared foreign keys first
    for table_name in table_names {
        let fk_query = format!("PRAGMA foreign_key_list(\"{}\")", table_name);
        if let Ok(mut stmt) = conn.prepare(&fk_query) {
            let fks = stmt.query_map([], |row| {
                Ok(Relationship {
                    from_table: table_name.clone(),
                    from_column: row.get(3)?,
                    to_table: row.get(2)?,
                    to_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    relationship_type: "foreign_key".to_string(),
                })
            });
            if let Ok(fks) = fks {
                relationships.extend(fks.filter_map(|r| r.ok()));
            }
        }
    }

    relationships.extend(infer_relationships(conn, table_names));
    relationships
}

/// Infer relationships by column-name matching between table pairs: exact
/// name equality, then `*_id`-style columns sharing a stem.
fn infer_relationships(conn: &Connection, table_names: &[String]) -> Vec<Relationship> {
    let mut table_columns: HashMap<String, Vec<String>> = HashMap::new();
    for table_name in table_names {
        if let Ok(mut stmt) = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table_name)) {
            if let Ok(cols) = stmt.query_map([], |row| row.get::<_, String>(1)) {
                table_columns.insert(table_name.clone(), cols.filter_map(|c| c.ok()).collect());
            }
        }
    }

    let mut inferred = Vec::new();
    for (i, table1) in table_names.iter().enumerate() {
        for table2 in table_names.iter().skip(i + 1) {
            let (Some(columns1), Some(columns2)) =
                (table_columns.get(table1), table_columns.get(table2))
            else {
                continue;
            };

            for col1 in columns1 {
                for col2 in columns2 {
                    if col1.to_lowercase() == col2.to_lowercase() {
                        inferred.push(Relationship {
                            from_table: table1.clone(),
                            from_column: col1.clone(),
                            to_table: table2.clone(),
                            to_column: col2.clone(),
                            relationship_type: "name_match".to_string(),
                        });
                    } else if id_pattern_match(col1, col2) {
                        inferred.push(Relationship {
                            from_table: table1.clone(),
                            from_column: col1.clone(),
                            to_table: table2.clone(),
                            to_column: col2.clone(),
                            relationship_type: "id_pattern_match".to_string(),
                        });
                    }
                }
            }
        }
    }

    inferred
}

fn id_pattern_match(col1: &str, col2: &str) -> bool {
    let l1 = col1.to_lowercase();
    let l2 = col2.to_lowercase();
    if !l1.contains("id") || !l2.contains("id") || col1.len() <= 2 || col2.len() <= 2 {
        return false;
    }

    let stem1 = l1.replace('_', "").replace("id", "");
    let stem2 = l2.replace('_', "").replace("id", "");
    !stem1.is_empty() && !stem2.is_empty() && (stem1.contains(&stem2) || stem2.contains(&stem1))
}

/// Render the schema as prompt text: one block per table, first
/// [`PROMPT_COLUMN_LIMIT`] columns, remainder summarized.
pub fn schema_text(schema: &DatabaseSchema) -> String {
    if schema.tables.is_empty() {
        return "数据库结构信息不可用".to_string();
    }

    let mut text = String::from("数据库表结构：\n");
    for (table_name, table) in &schema.tables {
        text.push_str(&format!("\n表 {} ({} 行数据):\n", table_name, table.row_count));
        for column in table.columns.iter().take(PROMPT_COLUMN_LIMIT) {
            text.push_str(&format!("  - {} ({})\n", column.name, column.declared_type));
        }
        if table.columns.len() > PROMPT_COLUMN_LIMIT {
            text.push_str(&format!(
                "  ... 还有 {} 列\n",
                table.columns.len() - PROMPT_COLUMN_LIMIT
            ));
        }
    }

    if !schema.relationships.is_empty() {
        text.push_str("\n表关联关系：\n");
        for rel in schema.relationships.iter().take(3) {
            text.push_str(&format!(
                "- {}.{} → {}.{}\n",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column
            ));
        }
    }

    text
}

/// Business-flavored schema text for detailed analysis: columns are
/// bucketed so identifying and business fields lead, with one sample row.
pub async fn business_schema_text(llm: &LlmClient, schema: &DatabaseSchema) -> String {
    if schema.tables.is_empty() {
        return "数据库结构信息不可用".to_string();
    }

    let mut text = String::from("【数据库表结构 - 业务字段说明】\n");
    for (table_name, table) in &schema.tables {
        text.push_str(&format!("\n表名: {} (共{}行)\n", table_name, table.row_count));

        let buckets = categorize_columns(llm, table).await;
        let type_of = |name: &str| {
            table
                .columns
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.declared_type.clone())
                .unwrap_or_default()
        };

        if !buckets.key_fields.is_empty() {
            text.push_str("关键字段:\n");
            for field in &buckets.key_fields {
                text.push_str(&format!("  - {} ({})\n", field, type_of(field)));
            }
        }
        if !buckets.business_fields.is_empty() {
            text.push_str("业务字段:\n");
            for field in buckets.business_fields.iter().take(5) {
                text.push_str(&format!("  - {} ({})\n", field, type_of(field)));
            }
        }

        if let Some(sample) = table.sample_rows.first() {
            let shown: Vec<String> = buckets
                .key_fields
                .iter()
                .chain(buckets.business_fields.iter())
                .take(3)
                .filter_map(|f| sample.get(f).map(|v| format!("{}={}", f, v)))
                .collect();
            if !shown.is_empty() {
                text.push_str(&format!("关键数据示例:\n  {}\n", shown.join(", ")));
            }
        }
    }

    if !schema.relationships.is_empty() {
        text.push_str("\n【表关联关系】\n");
        for rel in schema.relationships.iter().take(3) {
            text.push_str(&format!(
                "- {}.{} → {}.{}\n",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column
            ));
        }
    }

    text
}

/// Classify the overall business domain of a database. LLM first,
/// rule-based fallback; never fails.
pub async fn classify_domain(llm: &LlmClient, schema: &DatabaseSchema) -> String {
    let filename = Path::new(&schema.database_path)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();

    let table_descriptions: Vec<String> = schema
        .tables
        .values()
        .take(5)
        .map(|t| {
            let columns: Vec<&str> = t.columns.iter().take(10).map(|c| c.name.as_str()).collect();
            format!(
                "表名: {}, 字段: {}, 数据行数: {}",
                t.name,
                columns.join(", "),
                t.row_count
            )
        })
        .collect();

    let prompt = format!(
        r#"你是数据库专家。请根据数据库文件名和表结构信息，判断数据库的业务类型。

数据库文件名: {}

表结构信息:
{}

请从以下类型中选择最合适的一个：
1. loan_customer - 银行客户贷款相关数据库
2. annual_report - 银行年报财务数据库
3. unknown - 无法确定类型

请只返回类型名称（loan_customer、annual_report 或 unknown），不要返回其他内容："#,
        filename,
        table_descriptions.join("\n")
    );

    match llm.call(&prompt, &CallOptions::sql_generation()).await {
        Ok(response) => {
            let result = response.trim().to_lowercase();
            if ["loan_customer", "annual_report", "unknown"].contains(&result.as_str()) {
                debug!("LLM classified database domain: {}", result);
                if result != "unknown" {
                    return result;
                }
            } else {
                warn!("LLM returned invalid domain label: {}", result);
            }
            rule_based_domain(&filename, schema)
        }
        Err(e) => {
            warn!("LLM domain classification failed: {}", e);
            rule_based_domain(&filename, schema)
        }
    }
}

fn rule_based_domain(filename: &str, schema: &DatabaseSchema) -> String {
    let lower = filename.to_lowercase();
    if lower.contains("annual") || lower.contains("report") {
        return "annual_report".to_string();
    }
    if lower.contains("loan") || lower.contains("customer") || lower.contains("bank_data") {
        return "loan_customer".to_string();
    }

    let upper_tables: Vec<String> = schema.tables.keys().map(|t| t.to_uppercase()).collect();
    if upper_tables.iter().any(|t| t.contains("ANNUAL_REPORT")) {
        "annual_report".to_string()
    } else if upper_tables
        .iter()
        .any(|t| t.contains("CUST_INFO") || t.contains("LOAN"))
    {
        "loan_customer".to_string()
    } else {
        "unknown".to_string()
    }
}

/// Bucket a table's columns into key/business/other. LLM first, simple
/// type-based fallback; never fails.
pub async fn categorize_columns(llm: &LlmClient, table: &TableSchema) -> FieldBuckets {
    let field_names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();

    let prompt = format!(
        r#"你是数据库专家。请将以下字段分类为三类：

字段列表: {}

分类标准：
1. 关键字段：主键、外键、标识符、名称等核心识别字段
2. 业务字段：金额、余额、分类、状态等业务数据字段
3. 其他字段：辅助信息、描述性字段等

请返回JSON格式：
{{
    "key_fields": ["字段1"],
    "business_fields": ["字段2"],
    "other_fields": ["字段3"]
}}

只返回JSON，不要其他解释："#,
        field_names.join(", ")
    );

    match llm.call(&prompt, &CallOptions::sql_generation()).await {
        Ok(response) => {
            let cleaned = response
                .trim()
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim()
                .to_string();
            match serde_json::from_str::<FieldBuckets>(&cleaned) {
                Ok(buckets)
                    if !(buckets.key_fields.is_empty()
                        && buckets.business_fields.is_empty()
                        && buckets.other_fields.is_empty()) =>
                {
                    buckets
                }
                _ => {
                    warn!("LLM field categorization unparseable, using simple buckets");
                    simple_categorize(table)
                }
            }
        }
        Err(e) => {
            warn!("LLM field categorization failed: {}", e);
            simple_categorize(table)
        }
    }
}

/// Business meaning of a single field, LLM-first; degrades to a generic
/// label.
pub async fn describe_field(llm: &LlmClient, field_name: &str) -> String {
    let prompt = format!(
        r#"你是银行业务数据专家。请分析字段名的业务含义。

字段名: {}

要求：
- 只返回简洁的业务含义描述（不超过20字）
- 不要解释分析过程
- 如果不确定，返回通用描述

请返回字段的业务含义："#,
        field_name
    );

    match llm.call(&prompt, &CallOptions::sql_generation()).await {
        Ok(response) => {
            let meaning: String = response.trim().chars().take(50).collect();
            if meaning.is_empty() {
                generic_field_label(field_name)
            } else {
                meaning
            }
        }
        Err(e) => {
            warn!("LLM field meaning failed for {}: {}", field_name, e);
            generic_field_label(field_name)
        }
    }
}

fn simple_categorize(table: &TableSchema) -> FieldBuckets {
    let mut buckets = FieldBuckets::default();
    for column in &table.columns {
        if column.primary_key {
            buckets.key_fields.push(column.name.clone());
        } else if matches!(
            column.declared_type.to_uppercase().as_str(),
            "INTEGER" | "REAL" | "NUMERIC"
        ) {
            buckets.business_fields.push(column.name.clone());
        } else {
            buckets.other_fields.push(column.name.clone());
        }
    }
    buckets
}

/// Generic degradation label for a table with no better description.
pub fn generic_table_label() -> String {
    "数据表".to_string()
}

/// Generic degradation label for a field with no better description.
pub fn generic_field_label(field_name: &str) -> String {
    format!("字段({})", field_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("dataproxy_schema_{}.db", name));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn introspects_tables_columns_and_samples() {
        let path = scratch_db("basic");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cust_info (cust_id INTEGER PRIMARY KEY, cust_name TEXT NOT NULL, balance REAL);
             INSERT INTO cust_info VALUES (1, '张三', 1000.5), (2, '李四', 88.0);",
        )
        .unwrap();
        drop(conn);

        let introspector = SchemaIntrospector::new();
        let schema = introspector.introspect(&path, true).unwrap();

        assert_eq!(schema.table_count(), 1);
        let table = &schema.tables["cust_info"];
        assert_eq!(table.row_count, 2);
        assert_eq!(table.columns.len(), 3);
        assert!(table.columns[0].primary_key);
        assert!(table.columns[1].not_null);
        assert_eq!(table.sample_rows.len(), 2);
        assert_eq!(
            table.sample_rows[0]["cust_name"],
            serde_json::Value::String("张三".to_string())
        );
    }

    #[test]
    fn excludes_system_tables_and_truncates_long_text() {
        let path = scratch_db("truncate");
        let conn = Connection::open(&path).unwrap();
        let long_text = "x".repeat(80);
        conn.execute_batch(&format!(
            "CREATE TABLE notes (id INTEGER, body TEXT);
             INSERT INTO notes VALUES (1, '{}');",
            long_text
        ))
        .unwrap();
        drop(conn);

        let introspector = SchemaIntrospector::new();
        let schema = introspector.introspect(&path, true).unwrap();

        assert_eq!(schema.table_count(), 1);
        let body = schema.tables["notes"].sample_rows[0]["body"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(body.chars().count(), SAMPLE_VALUE_MAX_CHARS + 3);
        assert!(body.ends_with("..."));
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut cache = SchemaCache::new(2);
        let schema = |p: &str| DatabaseSchema {
            database_path: p.to_string(),
            tables: BTreeMap::new(),
            relationships: Vec::new(),
        };

        cache.put("a".to_string(), schema("a"));
        cache.put("b".to_string(), schema("b"));
        assert!(cache.get("a").is_some());
        cache.put("c".to_string(), schema("c")); // evicts b

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn infers_name_match_relationships() {
        let path = scratch_db("rels");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE loans (loan_id INTEGER, cust_id INTEGER);
             CREATE TABLE customers (cust_id INTEGER, name TEXT);",
        )
        .unwrap();
        drop(conn);

        let introspector = SchemaIntrospector::new();
        let schema = introspector.introspect(&path, true).unwrap();

        assert!(schema
            .relationships
            .iter()
            .any(|r| r.relationship_type == "name_match" && r.from_column == "cust_id"));
    }

    #[test]
    fn rule_fallback_classifies_by_table_names() {
        let schema = DatabaseSchema {
            database_path: "/tmp/data.db".to_string(),
            tables: {
                let mut m = BTreeMap::new();
                m.insert(
                    "CUST_INFO".to_string(),
                    TableSchema {
                        name: "CUST_INFO".to_string(),
                        columns: Vec::new(),
                        row_count: 0,
                        sample_rows: Vec::new(),
                    },
                );
                m
            },
            relationships: Vec::new(),
        };
        assert_eq!(rule_based_domain("data.db", &schema), "loan_customer");
        assert_eq!(rule_based_domain("annual_2024.db", &schema), "annual_report");
    }

    #[tokio::test]
    async fn business_schema_text_buckets_fields() {
        let path = scratch_db("business_text");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cust_info (cust_id INTEGER PRIMARY KEY, cust_name TEXT, balance REAL);
             INSERT INTO cust_info VALUES (1, '张三', 1000.5);",
        )
        .unwrap();
        drop(conn);

        let introspector = SchemaIntrospector::new();
        let schema = introspector.introspect(&path, true).unwrap();

        let llm = LlmClient::new(
            "dummy-api-key".to_string(),
            "deepseek-chat".to_string(),
            "https://api.deepseek.com".to_string(),
        );
        let text = business_schema_text(&llm, &schema).await;

        assert!(text.contains("表名: cust_info (共1行)"));
        assert!(text.contains("关键字段:"));
        assert!(text.contains("业务字段:"));
        assert!(text.contains("cust_id=1"));
    }

    #[test]
    fn schema_text_lists_tables_and_caps_columns() {
        let columns: Vec<ColumnInfo> = (0..20)
            .map(|i| ColumnInfo {
                name: format!("col_{}", i),
                declared_type: "TEXT".to_string(),
                not_null: false,
                primary_key: false,
            })
            .collect();
        let mut tables = BTreeMap::new();
        tables.insert(
            "wide".to_string(),
            TableSchema {
                name: "wide".to_string(),
                columns,
                row_count: 7,
                sample_rows: Vec::new(),
            },
        );
        let schema = DatabaseSchema {
            database_path: "x.db".to_string(),
            tables,
            relationships: Vec::new(),
        };

        let text = schema_text(&schema);
        assert!(text.contains("表 wide (7 行数据):"));
        assert!(text.contains("... 还有 5 列"));
    }
}
