// src/orchestrator/mod.rs
//! Per-turn pipeline: analyze, execute, absorb, suggest.
//!
//! One turn runs to completion before the next begins; sessions are
//! isolated by holding one `ContextManager` each. Slash commands bypass the
//! analyzer and hit the store/context directly.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::context::{ContextManager, Role};
use crate::executor::{absorb_result, ExecutionData, Executor};
use crate::llm::{Action, IntentAnalysis, IntentBackend};
use crate::store::{TaskFilter, TaskStore};

const MAX_SUGGESTIONS: usize = 3;

/// Uniform per-turn outcome handed to front ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub success: bool,
    pub message: String,
    pub data: ExecutionData,
    pub analysis: Option<IntentAnalysis>,
    pub context_summary: String,
    pub suggestions: Vec<String>,
    pub needs_clarification: bool,
}

impl TurnResult {
    fn simple(ctx: &ContextManager, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: ExecutionData::None,
            analysis: None,
            context_summary: ctx.summary(),
            suggestions: Vec::new(),
            needs_clarification: false,
        }
    }
}

pub struct Orchestrator {
    backend: Arc<dyn IntentBackend>,
    executor: Executor,
    store: Arc<dyn TaskStore>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn IntentBackend>,
        store: Arc<dyn TaskStore>,
        owner_id: Option<String>,
    ) -> Self {
        let executor = Executor::new(store.clone(), backend.clone(), owner_id);
        Self {
            backend,
            executor,
            store,
        }
    }

    /// Process one user turn. Never returns an error to the front end: any
    /// unexpected failure becomes a generic failure result with a recorded
    /// bot message.
    pub async fn handle_turn(&self, ctx: &mut ContextManager, input: &str) -> TurnResult {
        match self.run_turn(ctx, input).await {
            Ok(result) => result,
            Err(e) => {
                error!("turn failed unexpectedly: {e:#}");
                let message = "Something went wrong on my end. Please try again.";
                ctx.add_message(Role::Bot, message, Vec::new());
                TurnResult {
                    success: false,
                    message: message.to_string(),
                    data: ExecutionData::None,
                    analysis: None,
                    context_summary: ctx.summary(),
                    suggestions: Vec::new(),
                    needs_clarification: false,
                }
            }
        }
    }

    async fn run_turn(&self, ctx: &mut ContextManager, input: &str) -> Result<TurnResult> {
        let input = input.trim();
        ctx.add_message(Role::User, input, Vec::new());

        if let Some(command) = input.strip_prefix('/') {
            if let Some(result) = self.run_command(ctx, command).await? {
                ctx.add_message(Role::Bot, &result.message, Vec::new());
                return Ok(result);
            }
            // Unknown command: treat the text as natural input.
        }

        let snapshot = ctx.context_for_ai();
        let analysis = self.backend.analyze(input, &snapshot).await;
        info!(
            action = analysis.primary_action.as_str(),
            confidence = analysis.confidence,
            "turn analyzed"
        );

        let result = if analysis.is_multi_operation() {
            // Context absorption happens per step inside the plan runner.
            self.executor.execute_plan(&analysis, ctx).await
        } else {
            let result = self.executor.execute(&analysis, ctx).await;
            absorb_result(ctx, &analysis.primary_action, &result);
            result
        };

        let displayed = match &result.data {
            ExecutionData::Task(task) => vec![task.clone()],
            ExecutionData::Tasks(tasks) => tasks.clone(),
            _ => Vec::new(),
        };
        ctx.add_message(Role::Bot, &result.message, displayed);

        let suggestions = build_suggestions(&result.suggestions, &analysis.primary_action);

        Ok(TurnResult {
            success: result.success,
            message: result.message,
            data: result.data,
            needs_clarification: result.needs_clarification,
            context_summary: ctx.summary(),
            suggestions,
            analysis: Some(analysis),
        })
    }

    // ── Slash commands ──────────────────────────────────────────────────

    /// Fixed command vocabulary. None means "not a known command"; the
    /// caller then falls back to the normal pipeline.
    async fn run_command(
        &self,
        ctx: &mut ContextManager,
        command: &str,
    ) -> Result<Option<TurnResult>> {
        let mut parts = command.splitn(2, ' ');
        let name = parts.next().unwrap_or("").to_lowercase();
        let args = parts.next().unwrap_or("").trim();

        let result = match name.as_str() {
            "help" => TurnResult::simple(
                ctx,
                "Commands: /help /stats /list /recent /search <term> /export /backup \
                 /config /reset /context /clear. Anything else is treated as a request.",
            ),
            "stats" => {
                let rows = self.store.stats(self.executor.owner_id()).await?;
                let total: i64 = rows.iter().map(|r| r.count).sum();
                let mut result =
                    TurnResult::simple(ctx, format!("{total} task(s) across {} group(s).", rows.len()));
                result.data = ExecutionData::Stats(rows);
                result
            }
            "list" => {
                let tasks = self
                    .store
                    .list(&TaskFilter {
                        owner_id: self.executor.owner_id().map(str::to_string),
                        ..Default::default()
                    })
                    .await?;
                ctx.add_tasks_to_memory(tasks.clone());
                let mut result =
                    TurnResult::simple(ctx, format!("You have {} task(s).", tasks.len()));
                result.data = ExecutionData::Tasks(tasks);
                result
            }
            "recent" => {
                let titles: Vec<String> = ctx
                    .entities
                    .recent_tasks
                    .iter()
                    .map(|t| t.title.clone())
                    .collect();
                if titles.is_empty() {
                    TurnResult::simple(ctx, "No tasks seen yet this session.")
                } else {
                    TurnResult::simple(ctx, format!("Recently seen: {}.", titles.join(", ")))
                }
            }
            "search" => {
                if args.is_empty() {
                    TurnResult::simple(ctx, "Usage: /search <term>")
                } else {
                    let tasks = self.store.search(args, self.executor.owner_id()).await?;
                    ctx.add_tasks_to_memory(tasks.clone());
                    let mut result = TurnResult::simple(
                        ctx,
                        format!("Found {} task(s) matching '{args}'.", tasks.len()),
                    );
                    result.data = ExecutionData::Tasks(tasks);
                    result
                }
            }
            "export" | "backup" => {
                let tasks = self
                    .store
                    .list(&TaskFilter {
                        owner_id: self.executor.owner_id().map(str::to_string),
                        limit: Some(i64::MAX),
                        ..Default::default()
                    })
                    .await?;
                let json = serde_json::to_string_pretty(&tasks)?;
                let mut result =
                    TurnResult::simple(ctx, format!("Export of {} task(s):\n{json}", tasks.len()));
                result.data = ExecutionData::Tasks(tasks);
                result
            }
            "config" => {
                let prefs = serde_json::to_string_pretty(&ctx.preferences)?;
                TurnResult::simple(ctx, format!("Current preferences:\n{prefs}"))
            }
            "reset" => {
                ctx.reset();
                TurnResult::simple(ctx, "Session reset. Starting fresh.")
            }
            "context" | "debug" => TurnResult::simple(ctx, ctx.summary()),
            "clear" => {
                ctx.clear_history();
                TurnResult::simple(ctx, "Conversation history cleared.")
            }
            _ => return Ok(None),
        };

        Ok(Some(result))
    }
}

// ============================================================================
// Suggestions
// ============================================================================

/// Up to three deduplicated follow-ups: the executor's own first, then
/// action-specific, then time-of-day.
fn build_suggestions(own: &[String], action: &Action) -> Vec<String> {
    let mut suggestions: Vec<String> = own.to_vec();

    let action_specific = match action {
        Action::Create | Action::Update => "Show my tasks",
        Action::Read => "Create a new task",
        Action::Delete => "Show remaining tasks",
        Action::Search => "Refine the search",
        Action::Analyze => "List pending tasks",
        Action::Other(_) => "Try /help for commands",
    };
    suggestions.push(action_specific.to_string());

    let hour = Utc::now().hour();
    if hour < 12 {
        suggestions.push("Plan your day: list tasks due today".to_string());
    } else if hour >= 18 {
        suggestions.push("Review what you completed today".to_string());
    }

    let mut deduped: Vec<String> = Vec::new();
    for s in suggestions {
        if !deduped.contains(&s) {
            deduped.push(s);
        }
    }
    deduped.truncate(MAX_SUGGESTIONS);
    deduped
}
