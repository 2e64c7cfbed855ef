use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wpp_search::{search, ProductIndex, SearchContext};
use wpp_storage::{CatalogStore, MemoryStore, PortalConfig, SettingsStore};
use wpp_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "wpp-cli")]
#[command(about = "Wholesale Parts Portal command-line interface")]
struct Cli {
    /// Portal YAML config; environment variables apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API against the seeded catalog.
    Serve,
    /// One-shot part-number lookup, printed as JSON.
    Search { query: String },
    /// Validate and load a catalog JSON file, reporting key collisions.
    Seed { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PortalConfig::load(path).await?,
        None => PortalConfig::from_env(),
    };

    let store = Arc::new(MemoryStore::new(config.settings));
    if let Some(path) = &config.catalog_path {
        let count = store.load_catalog_json(path).await?;
        info!(count, path = %path.display(), "catalog seeded");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            wpp_web::serve(AppState::new(store), &config).await?;
        }
        Commands::Search { query } => {
            let index = ProductIndex::build(store.all_products().await?);
            let ctx = SearchContext {
                visibility_threshold: store.visibility_threshold().await?,
            };
            println!("{}", serde_json::to_string_pretty(&search(&index, &query, &ctx))?);
        }
        Commands::Seed { file } => {
            let count = store.load_catalog_json(&file).await?;
            let index = ProductIndex::build(store.all_products().await?);
            println!(
                "loaded {count} products, {} duplicate normalized keys",
                index.duplicates().len()
            );
            for dup in index.duplicates() {
                println!(
                    "  {}: \"{}\" shadows \"{}\"",
                    dup.key, dup.kept_part_number, dup.shadowed_part_number
                );
            }
        }
    }

    Ok(())
}
