// src/main.rs

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use taskpilot::cli::{run_chat, run_command, Cli, Commands};
use taskpilot::config::CONFIG;
use taskpilot::llm::{OpenAiBackend, OpenAiClient};
use taskpilot::store::{self, SqliteTaskStore, TaskStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = CONFIG.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(CONFIG.sqlite_max_connections)
        .connect(&CONFIG.database_url)
        .await?;
    store::migration::run(&pool).await?;

    let task_store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(pool));
    let owner = cli.owner.clone();

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            info!("starting chat session (model: {})", CONFIG.model);
            let backend = Arc::new(OpenAiBackend::new(OpenAiClient::new()?));
            run_chat(backend, task_store, owner).await?;
        }
        command => run_command(command, task_store, owner).await?,
    }

    Ok(())
}
