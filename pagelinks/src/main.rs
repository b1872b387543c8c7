use std::sync::Arc;

use anyhow::Context;
use pagelinks::api::ApiServer;
use pagelinks::config::AppConfig;
use pagelinks::database::DbPools;
use pagelinks::logging;
use pagelinks::scraper::HttpFetcher;
use pagelinks::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").ok();
    let _log_guard = logging::init_logging(log_dir.as_deref())?;

    let config = AppConfig::from_env().context("Invalid configuration")?;

    let pools = DbPools::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let fetcher = Arc::new(HttpFetcher::new().context("Failed to create HTTP client")?);
    let services = ServiceContainer::new(pools, &config, fetcher);
    services.start_background_tasks().await?;

    let server = ApiServer::new(config.api.clone(), services.app_state());
    let cancel_token = server.cancel_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        cancel_token.cancel();
    });

    tracing::info!("pagelinks initialized successfully");
    let served = server.run().await;

    services.shutdown().await;
    served?;
    Ok(())
}
