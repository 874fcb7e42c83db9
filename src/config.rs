//! Runtime configuration loaded from the environment.
//!
//! Reads `.env` via dotenv at binary startup; every value has a working
//! default so a fresh checkout can serve queries against a local
//! `databases/` directory without further setup.

use std::path::PathBuf;

/// DeepSeek chat-completion endpoint (OpenAI-compatible).
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Clone)]
pub struct Settings {
    /// LLM credential. Absent key leaves the gateway in dummy mode.
    pub api_key: String,
    pub base_url: String,
    pub model: String,

    /// Directory scanned for `.db` files.
    pub data_dir: PathBuf,
    /// Directory holding per-database context JSON files.
    pub config_dir: PathBuf,

    pub port: u16,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Self {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .unwrap_or_else(|_| "dummy-api-key".to_string());

        let data_dir = std::env::var("DATAPROXY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("databases"));

        let config_dir = std::env::var("DATAPROXY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("configs/database_contexts"));

        let port = std::env::var("DATAPROXY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            data_dir,
            config_dir,
            port,
        }
    }

    pub fn llm_enabled(&self) -> bool {
        self.api_key != "dummy-api-key"
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}
