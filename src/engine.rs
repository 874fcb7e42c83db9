//! Query pipeline
//!
//! The single engine behind every entry point: assemble a per-request
//! [`QueryContext`] (schema + business context), build the prompt, ask the
//! LLM for SQL, extract and clean it, execute it, then post-process
//! (statistics, insights, chart suggestions).
//!
//! Failure policy mirrors the API contract: prompt, LLM and SQL failures
//! come back as a `QueryResponse` with `success = false`; only insight
//! generation propagates an `Err`, deliberately — it has no canned
//! fallback.

use crate::config::Settings;
use crate::context_store::{ContextStore, DatabaseContext};
use crate::error::{DataProxyError, Result};
use crate::executor::{self, Record};
use crate::insights::{self, Insights};
use crate::llm::{CallOptions, LlmClient};
use crate::prompt::PromptAssembler;
use crate::schema::{self, DatabaseSchema, SchemaIntrospector};
use crate::sql_extractor;
use crate::statistics::{self, ResultStatistics};
use crate::visualization::{self, VisualizationData};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Auto,
    Simple,
    Detailed,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Auto => "auto",
            AnalysisMode::Simple => "simple",
            AnalysisMode::Detailed => "detailed",
        }
    }

    fn wants_analysis(&self) -> bool {
        matches!(self, AnalysisMode::Auto | AnalysisMode::Detailed)
    }
}

impl Default for AnalysisMode {
    fn default() -> Self {
        AnalysisMode::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
    #[serde(default = "default_true")]
    pub enable_statistics: bool,
}

fn default_true() -> bool {
    true
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            analysis_mode: AnalysisMode::Auto,
            enable_statistics: true,
        }
    }
}

/// Everything one request needs, gathered up front. Immutable once built;
/// a database switch after this point cannot affect the request.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: String,
    pub database_path: PathBuf,
    pub schema: DatabaseSchema,
    pub context: DatabaseContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub data: Vec<Record>,
    pub columns: Vec<String>,
    pub record_count: usize,
    pub execution_time: f64,
    pub database: String,
    pub query_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<ResultStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Insights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<VisualizationData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

pub struct DataEngine {
    introspector: SchemaIntrospector,
    context_store: ContextStore,
    assembler: PromptAssembler,
    llm: LlmClient,
}

impl DataEngine {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            introspector: SchemaIntrospector::new(),
            context_store: ContextStore::new(&settings.config_dir)?,
            assembler: PromptAssembler::default(),
            llm: LlmClient::from_settings(settings),
        })
    }

    /// Engine with explicit parts; the assembler and gateway are the
    /// injectable strategies.
    pub fn with_parts(
        introspector: SchemaIntrospector,
        context_store: ContextStore,
        assembler: PromptAssembler,
        llm: LlmClient,
    ) -> Self {
        Self {
            introspector,
            context_store,
            assembler,
            llm,
        }
    }

    pub fn introspector(&self) -> &SchemaIntrospector {
        &self.introspector
    }

    pub fn context_store(&self) -> &ContextStore {
        &self.context_store
    }

    pub fn llm(&self) -> &LlmClient {
        &self.llm
    }

    /// Build the per-request context for a query.
    pub fn build_context(&self, database_path: &Path, query: &str) -> Result<QueryContext> {
        let schema = self.introspector.introspect(database_path, true)?;
        let context = self.context_store.load(database_path)?;

        Ok(QueryContext {
            query: query.to_string(),
            database_path: database_path.to_path_buf(),
            schema,
            context,
        })
    }

    /// Run the full pipeline for one query against one database.
    pub async fn query(
        &self,
        database_path: &Path,
        user_query: &str,
        options: &QueryOptions,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        info!("processing query: {}", user_query);

        let database_name = database_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let ctx = match self.build_context(database_path, user_query) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("context assembly failed: {}", e);
                return Ok(failure_response(
                    &database_name,
                    options,
                    None,
                    e.to_string(),
                    Vec::new(),
                    started,
                ));
            }
        };

        let sql = match self.generate_sql(&ctx, options).await {
            Ok(sql) => sql,
            Err(e) => {
                warn!("SQL generation failed: {}", e);
                return Ok(failure_response(
                    &database_name,
                    options,
                    None,
                    format!("SQL生成失败: {}", e),
                    Vec::new(),
                    started,
                ));
            }
        };

        let result = executor::execute(&sql, &ctx.database_path);
        if !result.success {
            return Ok(failure_response(
                &database_name,
                options,
                Some(sql),
                result.error.unwrap_or_else(|| "SQL执行失败".to_string()),
                result.suggestions,
                started,
            ));
        }

        let mut response = QueryResponse {
            success: true,
            sql: Some(sql.clone()),
            data: result.data,
            columns: result.columns,
            record_count: result.record_count,
            execution_time: 0.0,
            database: database_name,
            query_mode: options.analysis_mode.as_str().to_string(),
            statistics: None,
            insights: None,
            visualization: None,
            error: None,
            suggestions: Vec::new(),
        };

        if options.analysis_mode.wants_analysis() && !response.data.is_empty() {
            if options.enable_statistics {
                response.statistics = Some(statistics::compute(&response.data));
            }
            // no fallback here: a failed narration fails the request
            response.insights = Some(
                insights::generate_insights(&self.llm, user_query, &response.data, Some(sql.as_str()))
                    .await?,
            );
        }

        if response.data.len() > 1 {
            response.visualization = Some(visualization::prepare(&response.data));
        }

        response.execution_time = started.elapsed().as_secs_f64();
        info!(
            "query finished in {:.2}s, {} records",
            response.execution_time, response.record_count
        );
        Ok(response)
    }

    /// Prompt → LLM → extract → clean.
    async fn generate_sql(&self, ctx: &QueryContext, options: &QueryOptions) -> Result<String> {
        // detailed mode pays for the richer, LLM-bucketed schema text
        let schema_info = if options.analysis_mode == AnalysisMode::Detailed {
            schema::business_schema_text(&self.llm, &ctx.schema).await
        } else {
            schema::schema_text(&ctx.schema)
        };

        let prompt = self.assembler.build_prompt(
            &ctx.query,
            &schema_info,
            &ctx.context.terms_text(),
            &ctx.context.mappings_text(),
        )?;

        let response = self.llm.call(&prompt, &CallOptions::sql_generation()).await?;

        let sql = sql_extractor::extract_sql(&response)
            .ok_or_else(|| DataProxyError::Sql("未能提取到有效的SQL语句".to_string()))?;

        Ok(sql_extractor::clean_sql(&sql))
    }
}

fn failure_response(
    database: &str,
    options: &QueryOptions,
    sql: Option<String>,
    error: String,
    suggestions: Vec<String>,
    started: Instant,
) -> QueryResponse {
    QueryResponse {
        success: false,
        sql,
        data: Vec::new(),
        columns: Vec::new(),
        record_count: 0,
        execution_time: started.elapsed().as_secs_f64(),
        database: database.to_string(),
        query_mode: options.analysis_mode.as_str().to_string(),
        statistics: None,
        insights: None,
        visualization: None,
        error: Some(error),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn scratch_engine(name: &str) -> (DataEngine, PathBuf) {
        let dir = std::env::temp_dir().join(format!("dataproxy_engine_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let db_path = dir.join("bank_data.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cust_info (cust_id INTEGER PRIMARY KEY, cust_name TEXT, balance REAL);
             INSERT INTO cust_info VALUES (1, '张三', 1200.0), (2, '李四', 3400.0);",
        )
        .unwrap();
        drop(conn);

        let engine = DataEngine::with_parts(
            SchemaIntrospector::new(),
            ContextStore::new(dir.join("contexts")).unwrap(),
            PromptAssembler::default(),
            LlmClient::new(
                "dummy-api-key".to_string(),
                "deepseek-chat".to_string(),
                "https://api.deepseek.com".to_string(),
            ),
        );
        (engine, db_path)
    }

    #[tokio::test]
    async fn full_pipeline_with_dummy_llm() {
        let (engine, db_path) = scratch_engine("full");
        let response = engine
            .query(&db_path, "统计数据库中共有多少张表", &QueryOptions::default())
            .await
            .unwrap();

        assert!(response.success, "error: {:?}", response.error);
        assert!(response.sql.as_deref().unwrap().starts_with("SELECT"));
        assert_eq!(response.record_count, 1);
        assert!(response.statistics.is_some());
        assert!(response.insights.is_some());
        assert_eq!(response.database, "bank_data");
    }

    #[tokio::test]
    async fn simple_mode_skips_analysis() {
        let (engine, db_path) = scratch_engine("simple");
        let options = QueryOptions {
            analysis_mode: AnalysisMode::Simple,
            enable_statistics: true,
        };
        let response = engine
            .query(&db_path, "统计表数量", &options)
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.statistics.is_none());
        assert!(response.insights.is_none());
        assert_eq!(response.query_mode, "simple");
    }

    #[tokio::test]
    async fn detailed_mode_runs_full_analysis() {
        let (engine, db_path) = scratch_engine("detailed");
        let options = QueryOptions {
            analysis_mode: AnalysisMode::Detailed,
            enable_statistics: true,
        };
        let response = engine
            .query(&db_path, "统计客户数量", &options)
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.insights.is_some());
        assert!(response.statistics.is_some());
        assert_eq!(response.query_mode, "detailed");
    }

    #[tokio::test]
    async fn missing_database_fails_without_panicking() {
        let (engine, _) = scratch_engine("missing");
        let response = engine
            .query(
                Path::new("/nonexistent/ghost.db"),
                "统计表数量",
                &QueryOptions::default(),
            )
            .await
            .unwrap();

        assert!(!response.success);
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn context_is_built_per_request() {
        let (engine, db_path) = scratch_engine("context");
        let ctx = engine.build_context(&db_path, "统计客户数量").unwrap();

        assert_eq!(ctx.schema.table_count(), 1);
        assert_eq!(ctx.query, "统计客户数量");
        assert!(ctx.context.business_terms.is_empty());
    }
}
