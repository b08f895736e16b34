use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use normateca_sheets::SheetsClient;
use normateca_sync::{build_scheduler, DocumentCache, PortalConfig, SyncService};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "normateca")]
#[command(about = "Normateca document lookup service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the API server with the periodic sheet sync.
    Serve,
    /// Run one sync against the sheet and print the outcome.
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PortalConfig::from_env();
    info!(
        api_key_configured = !config.api_key.is_empty(),
        spreadsheet_configured = !config.spreadsheet_id.is_empty(),
        range = %config.range,
        "configuration loaded"
    );

    let source = Arc::new(SheetsClient::new(config.sheets_config())?);
    let cache = Arc::new(DocumentCache::new());
    let service = Arc::new(SyncService::new(source, cache.clone()));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Err(err) = service.refresh().await {
                warn!(error = %err, "initial sync failed; serving empty cache until the next refresh");
            }
            let scheduler = build_scheduler(service.clone(), &config.sync_cron).await?;
            scheduler.start().await.context("starting sync scheduler")?;
            normateca_web::serve_from_env(cache, service).await?;
        }
        Commands::Sync => {
            let summary = service.refresh().await?;
            println!(
                "sync complete: run_id={} rows={} documents={} unique={}",
                summary.run_id, summary.fetched_rows, summary.documents, summary.unique_documents
            );
        }
    }

    Ok(())
}
