use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bq_sql_assistant::bigquery_client::BigQueryClient;
use bq_sql_assistant::catalog::CatalogClient;
use bq_sql_assistant::config::schema_root_from_lookup;
use bq_sql_assistant::auth::AccessTokenProvider;
use bq_sql_assistant::llm::{GenerativeModel, VertexAiClient};
use bq_sql_assistant::{AssistantConfig, QueryPipeline, SchemaLoader, SchemaStore};

#[derive(Parser)]
#[command(name = "bq-sql-assistant")]
#[command(about = "Caches BigQuery schemas, infers an ERD and drafts SQL with Gemini", long_about = None)]
struct Cli {
    /// Project to work against (overrides BQ_PROJECT_ID)
    #[arg(long, global = true)]
    project_id: Option<String>,

    /// Local schema cache directory (overrides SCHEMA_ROOT)
    #[arg(long, global = true)]
    schema_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror changed table schemas locally and rebuild the schema snapshot
    Refresh,
    /// Rebuild the schema snapshot from the local cache only
    Load,
    /// Infer the ERD from recent query history
    Erd,
    /// Draft and revise a SQL query for a natural-language request
    Generate {
        request: String,

        /// Dry-run the draft and feed any error into the revision
        #[arg(long, default_value = "false")]
        dry_run_validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bq_sql_assistant=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Load = cli.command {
        // offline: only the local cache is read
        let schema_root = cli
            .schema_root
            .unwrap_or_else(|| schema_root_from_lookup(&|key: &str| std::env::var(key).ok()));
        let schema_map = SchemaLoader::new(schema_root).load()?;
        println!("{}", serde_json::to_string_pretty(&schema_map)?);
        return Ok(());
    }

    let project_override = cli.project_id.clone();
    let mut config = AssistantConfig::from_lookup(|key| match key {
        "BQ_PROJECT_ID" => project_override
            .clone()
            .or_else(|| std::env::var(key).ok()),
        _ => std::env::var(key).ok(),
    })
    .context("Failed to load configuration")?;

    if let Some(schema_root) = cli.schema_root {
        config.schema_root = schema_root;
    }
    if let Commands::Generate {
        dry_run_validate: true,
        ..
    } = &cli.command
    {
        config.dry_run_validate = true;
    }

    info!("Configuration loaded:");
    info!("  Project: {}", config.project_id);
    info!("  Location: {}", config.location);
    info!("  Schema root: {}", config.schema_root.display());
    info!("  Models: {} (ERD), {} (SQL)", config.erd_model_id, config.sql_model_id);

    let tokens = Arc::new(AccessTokenProvider::from_env());
    let catalog: Arc<dyn CatalogClient> = Arc::new(BigQueryClient::new(
        config.project_id.clone(),
        config.location.clone(),
        tokens.clone(),
    )?);

    match cli.command {
        Commands::Refresh => {
            let store = SchemaStore::new(config.schema_root.clone(), catalog);
            let report = store.refresh().await.context("Schema refresh failed")?;
            if !report.failed.is_empty() {
                info!("Tables left at their cached schema: {}", report.failed.join(", "));
            }
            SchemaLoader::new(config.schema_root.clone()).load()?;
        }
        Commands::Erd => {
            let model: Arc<dyn GenerativeModel> = Arc::new(VertexAiClient::new(
                config.project_id.clone(),
                config.location.clone(),
                tokens,
            )?);
            let pipeline = QueryPipeline::new(config, catalog, model);
            let report = pipeline.generate_erd().await.context("ERD generation failed")?;
            match report.json_path {
                Some(path) => info!("ERD written to {}", path.display()),
                None => info!("ERD json unchanged; see {}", report.summary_path.display()),
            }
        }
        Commands::Generate { request, .. } => {
            let model: Arc<dyn GenerativeModel> = Arc::new(VertexAiClient::new(
                config.project_id.clone(),
                config.location.clone(),
                tokens,
            )?);
            let project_id = config.project_id.clone();
            let pipeline = QueryPipeline::new(config, catalog, model);
            let result = pipeline
                .generate_sql(&request, &project_id)
                .await
                .context("SQL generation failed")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Load => {}
    }

    Ok(())
}
