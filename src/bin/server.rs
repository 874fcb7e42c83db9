//! HTTP API server for DataProxy
//! Simple HTTP server using tokio and basic HTTP handling

use dataproxy::config::Settings;
use dataproxy::context_store::{BusinessTerm, FieldMapping};
use dataproxy::engine::{DataEngine, QueryOptions};
use dataproxy::error::DataProxyError;
use dataproxy::importer::CsvImporter;
use dataproxy::registry::DatabaseRegistry;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

struct AppState {
    settings: Settings,
    engine: DataEngine,
    registry: Mutex<DatabaseRegistry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();
    if settings.llm_enabled() {
        info!("DeepSeek API key found, LLM generation enabled");
    } else {
        warn!("DEEPSEEK_API_KEY not set, running in dummy LLM mode");
    }

    let engine = DataEngine::new(&settings)?;
    let registry = Mutex::new(DatabaseRegistry::new(&settings.data_dir));
    let state = Arc::new(AppState {
        settings,
        engine,
        registry,
    });

    let addr = format!("0.0.0.0:{}", state.settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("DataProxy API server listening on http://{}", addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("new connection from {}", addr);
        let state = state.clone();
        tokio::spawn(handle_connection(stream, state));
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    use tokio::time::{timeout, Duration};

    // Read request with timeout to prevent hanging
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break, // EOF
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if let Ok(s) = std::str::from_utf8(&buffer) {
                        if let Some(headers_end) = s.find("\r\n\r\n") {
                            if let Some(content_length) = extract_content_length(s) {
                                if buffer.len() >= headers_end + 4 + content_length {
                                    break; // full request received
                                }
                            } else if n < temp_buf.len() {
                                break;
                            }
                        }
                    }
                    if buffer.len() > 10_000_000 {
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to read from stream: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    })
    .await;

    if read_result.is_err() {
        warn!("request read timeout");
        return;
    }
    if buffer.is_empty() {
        return;
    }

    match String::from_utf8(buffer) {
        Ok(request) => {
            let response = handle_request(&request, &state).await;
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                error!("failed to write response: {}", e);
            }
        }
        Err(e) => error!("failed to parse request as UTF-8: {}", e),
    }
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

async fn handle_request(request: &str, state: &AppState) -> String {
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("").split('?').next().unwrap_or("");
    let body = request.split("\r\n\r\n").nth(1).unwrap_or("");

    if method == "OPTIONS" {
        return http_response(204, "No Content", "");
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let result = match (method, segments.as_slice()) {
        ("GET", ["api", "v1", "system", "health"]) => handle_health(state),
        ("POST", ["api", "v1", "queries", "agent"]) => handle_query(body, state).await,
        ("GET", ["api", "v1", "databases"]) => handle_list_databases(state).await,
        ("POST", ["api", "v1", "databases", "switch"]) => handle_switch(body, state).await,
        ("GET", ["api", "v1", "contexts"]) => handle_list_contexts(state),
        ("GET", ["api", "v1", "contexts", db, "terms"]) => handle_get_terms(db, state),
        ("POST", ["api", "v1", "contexts", db, "terms"]) => handle_add_term(db, body, state),
        ("PUT", ["api", "v1", "contexts", db, "terms", term]) => {
            handle_update_term(db, term, body, state)
        }
        ("DELETE", ["api", "v1", "contexts", db, "terms", term]) => {
            handle_delete_term(db, term, state)
        }
        ("GET", ["api", "v1", "contexts", db, "mappings"]) => handle_get_mappings(db, state),
        ("PUT", ["api", "v1", "contexts", db, "mappings"]) => {
            handle_put_mappings(db, body, state)
        }
        ("POST", ["api", "v1", "files", "upload"]) => handle_upload(body, state).await,
        _ => Err(ApiError::not_found(path)),
    };

    match result {
        Ok(value) => http_response(200, "OK", &value.to_string()),
        Err(e) => {
            let body = json!({"success": false, "error": e.message}).to_string();
            http_response(e.status, e.status_text, &body)
        }
    }
}

struct ApiError {
    status: u16,
    status_text: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            status_text: "Bad Request",
            message: message.into(),
        }
    }

    fn not_found(path: &str) -> Self {
        Self {
            status: 404,
            status_text: "Not Found",
            message: format!("未知的接口路径: {}", path),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            status_text: "Internal Server Error",
            message: message.into(),
        }
    }
}

impl From<DataProxyError> for ApiError {
    fn from(e: DataProxyError) -> Self {
        match &e {
            DataProxyError::Validation(_) | DataProxyError::Context(_) => {
                ApiError::bad_request(e.to_string())
            }
            _ => ApiError::internal(e.to_string()),
        }
    }
}

type ApiResult = std::result::Result<serde_json::Value, ApiError>;

fn parse_body<T: for<'de> Deserialize<'de>>(body: &str) -> std::result::Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::bad_request(format!("请求体格式错误: {}", e)))
}

/// Context files are keyed by database stem, so a bare name is enough.
fn context_key(db_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.db", db_name))
}

fn handle_health(state: &AppState) -> ApiResult {
    Ok(json!({
        "success": true,
        "status": "ok",
        "llm_enabled": state.settings.llm_enabled(),
    }))
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(flatten)]
    options: QueryOptions,
}

async fn handle_query(body: &str, state: &AppState) -> ApiResult {
    let request: QueryRequest = parse_body(body)?;
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query不能为空"));
    }

    // Resolve the active database once; a concurrent switch affects only
    // later requests.
    let database_path = {
        let registry = state.registry.lock().await;
        registry
            .current_path()
            .ok_or_else(|| ApiError::bad_request("未选择数据库，请先切换数据库"))?
    };

    let response = state
        .engine
        .query(&database_path, &request.query, &request.options)
        .await
        .map_err(ApiError::from)?;

    serde_json::to_value(response).map_err(|e| ApiError::internal(e.to_string()))
}

async fn handle_list_databases(state: &AppState) -> ApiResult {
    let mut registry = state.registry.lock().await;
    registry.refresh();

    let databases: Vec<String> = registry
        .available_databases()
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();

    Ok(json!({
        "success": true,
        "databases": databases,
        "current": registry.current(),
    }))
}

#[derive(Deserialize)]
struct SwitchRequest {
    database_path: PathBuf,
}

async fn handle_switch(body: &str, state: &AppState) -> ApiResult {
    let request: SwitchRequest = parse_body(body)?;

    let info = {
        let mut registry = state.registry.lock().await;
        match registry.switch(&request.database_path) {
            Ok(info) => info.clone(),
            Err(e) => return Err(ApiError::bad_request(e.to_string())),
        }
    };

    state.engine.introspector().invalidate(&request.database_path);

    // best-effort business-domain tag for the freshly selected database
    let domain = match state
        .engine
        .introspector()
        .introspect(&request.database_path, true)
    {
        Ok(schema) => dataproxy::schema::classify_domain(state.engine.llm(), &schema).await,
        Err(_) => "unknown".to_string(),
    };

    Ok(json!({"success": true, "database": info, "domain": domain}))
}

fn handle_list_contexts(state: &AppState) -> ApiResult {
    let files = state.engine.context_store().list_context_files()?;

    let mut contexts = Vec::new();
    for path in files {
        let Some(name) = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .and_then(|n| n.strip_suffix("_context.json").map(str::to_string))
        else {
            continue;
        };

        if let Ok(context) = state.engine.context_store().load(&context_key(&name)) {
            contexts.push(json!({
                "database_name": name,
                "table_count": context.tables.len(),
                "business_terms_count": context.business_terms.len(),
                "field_mappings_count": context.field_mappings.len(),
            }));
        }
    }

    let total_count = contexts.len();
    Ok(json!({"success": true, "contexts": contexts, "total_count": total_count}))
}

fn handle_get_terms(db_name: &str, state: &AppState) -> ApiResult {
    let context = state.engine.context_store().load(&context_key(db_name))?;
    Ok(json!({
        "success": true,
        "business_terms": context.business_terms,
        "total_count": context.business_terms.len(),
    }))
}

#[derive(Deserialize)]
struct TermRequest {
    name: String,
    #[serde(flatten)]
    term: BusinessTerm,
}

fn handle_add_term(db_name: &str, body: &str, state: &AppState) -> ApiResult {
    let request: TermRequest = parse_body(body)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("术语名称不能为空"));
    }

    state
        .engine
        .context_store()
        .add_term(&context_key(db_name), &request.name, request.term)?;
    Ok(json!({"success": true, "term": request.name}))
}

fn handle_update_term(db_name: &str, term_name: &str, body: &str, state: &AppState) -> ApiResult {
    let term: BusinessTerm = parse_body(body)?;
    state
        .engine
        .context_store()
        .update_term(&context_key(db_name), term_name, term)?;
    Ok(json!({"success": true, "term": term_name}))
}

fn handle_delete_term(db_name: &str, term_name: &str, state: &AppState) -> ApiResult {
    state
        .engine
        .context_store()
        .delete_term(&context_key(db_name), term_name)?;
    Ok(json!({"success": true, "term": term_name}))
}

fn handle_get_mappings(db_name: &str, state: &AppState) -> ApiResult {
    let context = state.engine.context_store().load(&context_key(db_name))?;
    Ok(json!({
        "success": true,
        "field_mappings": context.field_mappings,
        "total_count": context.field_mappings.len(),
    }))
}

#[derive(Deserialize)]
struct MappingsRequest {
    field_mappings: BTreeMap<String, FieldMapping>,
}

fn handle_put_mappings(db_name: &str, body: &str, state: &AppState) -> ApiResult {
    let request: MappingsRequest = parse_body(body)?;
    let updated_count = request.field_mappings.len();
    state
        .engine
        .context_store()
        .set_field_mappings(&context_key(db_name), request.field_mappings)?;
    Ok(json!({"success": true, "updated_count": updated_count}))
}

#[derive(Deserialize)]
struct UploadRequest {
    file_path: PathBuf,
}

async fn handle_upload(body: &str, state: &AppState) -> ApiResult {
    let request: UploadRequest = parse_body(body)?;
    if !request.file_path.exists() {
        return Err(ApiError::bad_request(format!(
            "文件不存在: {}",
            request.file_path.display()
        )));
    }
    if request.file_path.extension().map(|e| e != "csv").unwrap_or(true) {
        return Err(ApiError::bad_request("仅支持CSV文件导入"));
    }

    let importer = CsvImporter::new(state.engine.context_store());
    let output_dir = state.settings.data_dir.join("imported");
    let summary = importer
        .import(&request.file_path, &output_dir, state.engine.llm())
        .await
        .map_err(ApiError::from)?;

    state.engine.introspector().invalidate(&summary.database_path);
    state.registry.lock().await.refresh();

    Ok(json!({"success": true, "import": summary}))
}

fn http_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    )
}
