//! Importer - HTTP trigger and one-shot CLI for spreadsheet imports
//!
//! Usage:
//!   importer serve [--bind 0.0.0.0:8080]
//!   importer process --file-id <uuid> --file-path <path> [--file-name <name>] [--dry-run]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use importer::commit::MetricStore;
use importer::config::Config;
use importer::db::{DryRunStore, PgStore};
use importer::llm::OpenAiClient;
use importer::pipeline::{Collaborators, ImportPipeline, ImportRequest};
use importer::status::FileStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Extracts regional metrics from uploaded spreadsheets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP trigger
    Serve {
        /// Overrides API_BIND
        #[arg(long)]
        bind: Option<String>,
    },
    /// Import a single file and exit
    Process {
        /// File record id (UUID)
        #[arg(long)]
        file_id: String,

        /// Object path inside the uploads bucket
        #[arg(long)]
        file_path: String,

        /// Original file name; defaults to the object path
        #[arg(long)]
        file_name: Option<String>,

        /// Log inserts and status updates instead of writing them; skips the processed artifact
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,importer=info")),
        )
        .init();
}

async fn build_pipeline(config: &Config, dry_run: bool) -> Result<ImportPipeline> {
    let db = Arc::new(PgStore::connect(&config.db_url).await?);
    let objects = importer::storage::from_config(&config.storage)?;
    let completion = Arc::new(OpenAiClient::new(config.llm.clone())?);

    let metrics: Arc<dyn MetricStore>;
    let files: Arc<dyn FileStore>;
    if dry_run {
        tracing::warn!("dry run: no rows will be written");
        metrics = Arc::new(DryRunStore);
        files = Arc::new(DryRunStore);
    } else {
        metrics = db.clone();
        files = db.clone();
    }

    let deps = Collaborators {
        objects,
        regions: db,
        metrics,
        files,
        completion,
    };
    let pipeline_config = if dry_run {
        config.pipeline.clone().dry_run()
    } else {
        config.pipeline.clone()
    };
    Ok(ImportPipeline::new(deps, pipeline_config))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            let pipeline = build_pipeline(&config, false).await?;
            let app = importer::http::router(Arc::new(pipeline));

            tracing::info!(%bind, model = %config.llm.model, "importer listening");
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Process {
            file_id,
            file_path,
            file_name,
            dry_run,
        } => {
            let job = ImportRequest {
                file_id: Some(file_id),
                file_path: Some(file_path),
                file_name,
            }
            .into_job()?;
            let pipeline = build_pipeline(&config, dry_run).await?;
            let outcome = pipeline.run(&job).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.metadata)?);
        }
    }

    Ok(())
}
