// src/cli/chat.rs
//! Interactive chat loop: one ContextManager for the session, one turn at a
//! time through the Orchestrator.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::context::ContextManager;
use crate::llm::IntentBackend;
use crate::orchestrator::Orchestrator;
use crate::store::TaskStore;

pub async fn run_chat(
    backend: Arc<dyn IntentBackend>,
    store: Arc<dyn TaskStore>,
    owner: Option<String>,
) -> Result<()> {
    let orchestrator = Orchestrator::new(backend, store, owner);
    let mut ctx = ContextManager::new();

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"taskpilot ready. Type a request, /help for commands, 'exit' to quit.\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let result = orchestrator.handle_turn(&mut ctx, input).await;

        let mut rendered = String::new();
        rendered.push_str(&result.message);
        rendered.push('\n');
        if result.needs_clarification {
            rendered.push_str("(please be more specific)\n");
        }
        if !result.suggestions.is_empty() {
            rendered.push_str("Next: ");
            rendered.push_str(&result.suggestions.join(" | "));
            rendered.push('\n');
        }
        rendered.push_str("> ");

        stdout.write_all(rendered.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
