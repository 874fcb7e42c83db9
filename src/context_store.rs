//! Business Context Store
//!
//! Per-database JSON config holding business-term definitions, field
//! mappings and query-scope rules, stored under
//! `<config_dir>/<db_stem>_context.json`. A missing file is an empty
//! context, not an error. Term CRUD rewrites the whole file.
//!
//! Terms have one canonical shape; legacy files that stored a bare
//! SQL-condition string per term are accepted on load and normalized on
//! the next save.

use crate::error::{DataProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessTerm {
    #[serde(default)]
    pub definition: String,
    #[serde(default, alias = "sql_conditions", alias = "calculation")]
    pub sql_condition: String,
    #[serde(default)]
    pub applicable_tables: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Physical column name.
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chinese_name: Option<String>,
}

/// Accepts both the canonical object shape and the legacy bare-string
/// shape found in older context files.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TermShape {
    Full(BusinessTerm),
    Legacy(String),
}

impl From<TermShape> for BusinessTerm {
    fn from(shape: TermShape) -> Self {
        match shape {
            TermShape::Full(term) => term,
            TermShape::Legacy(sql_condition) => BusinessTerm {
                definition: String::new(),
                sql_condition,
                applicable_tables: Vec::new(),
                examples: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MappingShape {
    Full(FieldMapping),
    Legacy(String),
}

impl From<MappingShape> for FieldMapping {
    fn from(shape: MappingShape) -> Self {
        match shape {
            MappingShape::Full(mapping) => mapping,
            MappingShape::Legacy(column) => FieldMapping {
                column,
                chinese_name: None,
            },
        }
    }
}

/// Per-table annotation recorded when a database is imported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableContextEntry {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseContext {
    pub tables: BTreeMap<String, TableContextEntry>,
    pub business_terms: BTreeMap<String, BusinessTerm>,
    pub field_mappings: BTreeMap<String, FieldMapping>,
    pub query_scope_rules: Vec<String>,
    /// RFC 3339, stamped on every save.
    pub updated_at: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContext {
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    tables: BTreeMap<String, TableContextEntry>,
    #[serde(default)]
    business_terms: BTreeMap<String, TermShape>,
    #[serde(default, alias = "field_descriptions")]
    field_mappings: BTreeMap<String, MappingShape>,
    #[serde(default)]
    query_scope_rules: Vec<String>,
}

impl From<RawContext> for DatabaseContext {
    fn from(raw: RawContext) -> Self {
        Self {
            tables: raw.tables,
            business_terms: raw
                .business_terms
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
            field_mappings: raw
                .field_mappings
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
            query_scope_rules: raw.query_scope_rules,
            updated_at: raw.updated_at,
        }
    }
}

impl DatabaseContext {
    /// Prompt block for business terms.
    pub fn terms_text(&self) -> String {
        if self.business_terms.is_empty() {
            return "无业务术语定义".to_string();
        }

        let mut text = String::from("业务术语定义：\n");
        for (name, term) in &self.business_terms {
            text.push_str(&format!("- {}: {}", name, term.definition));
            if !term.sql_condition.is_empty() {
                text.push_str(&format!(" (SQL: {})", term.sql_condition));
            }
            text.push('\n');
        }
        text
    }

    /// Prompt block for field mappings.
    pub fn mappings_text(&self) -> String {
        if self.field_mappings.is_empty() {
            return "无字段映射配置".to_string();
        }

        let mut text = String::from("字段映射：\n");
        for (logical, mapping) in &self.field_mappings {
            match &mapping.chinese_name {
                Some(label) => {
                    text.push_str(&format!("- {} → {} ({})\n", logical, mapping.column, label))
                }
                None => text.push_str(&format!("- {} → {}\n", logical, mapping.column)),
            }
        }
        text
    }
}

pub struct ContextStore {
    config_dir: PathBuf,
}

impl ContextStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&config_dir)?;
        Ok(Self { config_dir })
    }

    /// Context file for a database: `<stem>_context.json`.
    pub fn context_path(&self, database_path: &Path) -> PathBuf {
        let stem = database_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "database".to_string());
        self.config_dir.join(format!("{}_context.json", stem))
    }

    /// Load the context for a database; a missing file yields empty
    /// collections.
    pub fn load(&self, database_path: &Path) -> Result<DatabaseContext> {
        let path = self.context_path(database_path);
        if !path.exists() {
            debug!("no context file at {}, using empty context", path.display());
            return Ok(DatabaseContext::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let raw: RawContext = serde_json::from_str(&content)
            .map_err(|e| DataProxyError::Context(format!("上下文文件解析失败: {}", e)))?;
        Ok(raw.into())
    }

    /// Rewrite the whole context file, stamping `updated_at`.
    pub fn save(&self, database_path: &Path, context: &DatabaseContext) -> Result<()> {
        let mut stamped = context.clone();
        stamped.updated_at = chrono::Utc::now().to_rfc3339();

        let path = self.context_path(database_path);
        let content = serde_json::to_string_pretty(&stamped)?;
        std::fs::write(&path, content)?;
        info!("context saved: {}", path.display());
        Ok(())
    }

    pub fn add_term(&self, database_path: &Path, name: &str, term: BusinessTerm) -> Result<()> {
        let mut context = self.load(database_path)?;
        context.business_terms.insert(name.to_string(), term);
        self.save(database_path, &context)
    }

    pub fn update_term(&self, database_path: &Path, name: &str, term: BusinessTerm) -> Result<()> {
        let mut context = self.load(database_path)?;
        if !context.business_terms.contains_key(name) {
            return Err(DataProxyError::Context(format!("业务术语不存在: {}", name)));
        }
        context.business_terms.insert(name.to_string(), term);
        self.save(database_path, &context)
    }

    pub fn delete_term(&self, database_path: &Path, name: &str) -> Result<()> {
        let mut context = self.load(database_path)?;
        if context.business_terms.remove(name).is_none() {
            return Err(DataProxyError::Context(format!("业务术语不存在: {}", name)));
        }
        self.save(database_path, &context)
    }

    pub fn set_field_mappings(
        &self,
        database_path: &Path,
        mappings: BTreeMap<String, FieldMapping>,
    ) -> Result<()> {
        let mut context = self.load(database_path)?;
        context.field_mappings = mappings;
        self.save(database_path, &context)
    }

    /// List all `<stem>_context.json` files in the config dir.
    pub fn list_context_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.config_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with("_context.json"))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store(name: &str) -> (ContextStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("dataproxy_ctx_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = ContextStore::new(&dir).unwrap();
        (store, PathBuf::from("bank_data.db"))
    }

    #[test]
    fn missing_file_yields_empty_context() {
        let (store, db) = scratch_store("empty");
        let context = store.load(&db).unwrap();
        assert!(context.business_terms.is_empty());
        assert!(context.field_mappings.is_empty());
    }

    #[test]
    fn term_round_trip_preserves_definition_and_condition() {
        let (store, db) = scratch_store("roundtrip");

        let term = BusinessTerm {
            definition: "指corp_deposit_y_avg_bal大于等于10万的客户".to_string(),
            sql_condition: "corp_deposit_y_avg_bal >= 100000".to_string(),
            applicable_tables: vec!["cust_info".to_string()],
            examples: vec!["统计对公有效户数量".to_string()],
        };
        store.add_term(&db, "对公有效户", term.clone()).unwrap();

        let reloaded = store.load(&db).unwrap();
        let read_back = &reloaded.business_terms["对公有效户"];
        assert_eq!(read_back.definition, term.definition);
        assert_eq!(read_back.sql_condition, term.sql_condition);
    }

    #[test]
    fn update_and_delete_require_existing_term() {
        let (store, db) = scratch_store("crud");

        assert!(store
            .update_term(&db, "不存在", BusinessTerm::default())
            .is_err());
        assert!(store.delete_term(&db, "不存在").is_err());

        store
            .add_term(&db, "不良贷款", BusinessTerm {
                definition: "分类结果为次级、可疑、损失的贷款".to_string(),
                sql_condition: "CONTRACT_CL_RESULT IN (2, 3, 4)".to_string(),
                ..Default::default()
            })
            .unwrap();
        store.delete_term(&db, "不良贷款").unwrap();
        assert!(store.load(&db).unwrap().business_terms.is_empty());
    }

    #[test]
    fn legacy_string_terms_are_normalized() {
        let (store, db) = scratch_store("legacy");
        let path = store.context_path(&db);
        std::fs::write(
            &path,
            r#"{"business_terms": {"个人客户": "customer_type = '个人'"}}"#,
        )
        .unwrap();

        let context = store.load(&db).unwrap();
        assert_eq!(
            context.business_terms["个人客户"].sql_condition,
            "customer_type = '个人'"
        );

        // saving rewrites the canonical shape
        store.save(&db, &context).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("sql_condition"));
    }

    #[test]
    fn prompt_text_includes_terms_and_mappings() {
        let (store, db) = scratch_store("text");
        store
            .add_term(&db, "对公客户", BusinessTerm {
                definition: "客户类型为对公".to_string(),
                sql_condition: "customer_type = '对公'".to_string(),
                ..Default::default()
            })
            .unwrap();

        let mut mappings = BTreeMap::new();
        mappings.insert(
            "客户名称".to_string(),
            FieldMapping {
                column: "cust_name".to_string(),
                chinese_name: Some("客户名称".to_string()),
            },
        );
        store.set_field_mappings(&db, mappings).unwrap();

        let context = store.load(&db).unwrap();
        assert!(context.terms_text().contains("对公客户"));
        assert!(context.terms_text().contains("customer_type = '对公'"));
        assert!(context.mappings_text().contains("cust_name"));
    }
}
