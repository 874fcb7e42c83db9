use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataProxyError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Insight error: {0}")]
    Insight(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DataProxyError>;
