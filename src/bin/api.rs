use anomaly_analysis_service::{
    analysis::AnalysisService,
    api::{create_router, start_server},
    config::Config,
    gemini::GeminiClient,
    report::RegexReportParser,
    store::SqliteStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    if let Err(e) = config.validate() {
        eprintln!("⚠️  {}", e);
        eprintln!("📌 Set the missing values in .env or the environment");
        return Err(e.into());
    }

    info!("🚀 {} - API Server", config.app_name);
    config.log_summary();

    // Create components
    let backend = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_base_url.clone(),
    )?);
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let parser = Arc::new(RegexReportParser);

    let service = Arc::new(AnalysisService::new(&config, backend, parser, store));

    info!("✅ Analysis service initialized");
    info!("📡 Starting API server...");

    let router = create_router(service, &config);
    start_server(router, &config.bind_address()).await?;

    Ok(())
}
