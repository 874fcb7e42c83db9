use anyhow::Result;
use clap::Parser;
use dataproxy::config::Settings;
use dataproxy::engine::{AnalysisMode, DataEngine, QueryOptions};
use dataproxy::registry::DatabaseRegistry;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "dataproxy")]
#[command(about = "Natural-language SQL analytics over SQLite banking data")]
struct Args {
    /// The analysis query in natural language
    query: String,

    /// Database file to query (default: auto-select from the data dir)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Directory scanned for .db files (default: ./databases)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Analysis mode: auto | simple | detailed
    #[arg(long, default_value = "auto")]
    mode: String,

    /// DeepSeek API key (or set DEEPSEEK_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(api_key) = args.api_key {
        settings.api_key = api_key;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }

    if !settings.llm_enabled() {
        info!("DEEPSEEK_API_KEY not set, running in dummy LLM mode");
    }

    let database_path = match args.database {
        Some(path) => path,
        None => {
            let registry = DatabaseRegistry::new(&settings.data_dir);
            registry.current_path().ok_or_else(|| {
                anyhow::anyhow!(
                    "no database selected; pass --database or put exactly one .db file under {}",
                    settings.data_dir.display()
                )
            })?
        }
    };

    let analysis_mode = match args.mode.as_str() {
        "simple" => AnalysisMode::Simple,
        "detailed" => AnalysisMode::Detailed,
        _ => AnalysisMode::Auto,
    };

    let engine = DataEngine::new(&settings)?;
    let response = engine
        .query(
            &database_path,
            &args.query,
            &QueryOptions {
                analysis_mode,
                enable_statistics: true,
            },
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
