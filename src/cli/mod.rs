// src/cli/mod.rs
// CLI surface: direct store subcommands plus the interactive chat loop.

pub mod chat;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::store::{NewTask, TaskFilter, TaskPatch, TaskPriority, TaskStatus, TaskStore};

pub use chat::run_chat;

#[derive(Parser)]
#[command(name = "taskpilot")]
#[command(about = "Conversational task-management assistant")]
#[command(version)]
pub struct Cli {
    /// Owner id to scope all operations to
    #[arg(long, global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat (default)
    Chat,

    /// Create a task directly
    Create {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// low | medium | high | urgent
        #[arg(short, long)]
        priority: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,

        /// ISO date, or 'today' / 'tomorrow'
        #[arg(long)]
        due: Option<String>,
    },

    /// List tasks
    List {
        /// pending | in_progress | completed | cancelled
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long)]
        priority: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Update fields of a task by id
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long)]
        priority: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(long)]
        due: Option<String>,
    },

    /// Delete a task by id
    Delete { id: String },

    /// Search tasks by free text
    Search { term: String },

    /// Dump tasks as JSON
    Export {
        /// Output file; stdout if omitted
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },
}

fn parse_status_arg(s: &str) -> Result<TaskStatus> {
    TaskStatus::parse(s).with_context(|| format!("unknown status '{s}'"))
}

fn parse_priority_arg(s: &str) -> Result<TaskPriority> {
    TaskPriority::parse(s).with_context(|| format!("unknown priority '{s}'"))
}

fn print_task_line(task: &crate::store::Task) {
    println!(
        "{}  [{}/{}]  {}{}",
        &task.id[..8.min(task.id.len())],
        task.status.as_str(),
        task.priority.as_str(),
        task.title,
        task.due_date
            .map(|d| format!("  (due {})", d.format("%Y-%m-%d")))
            .unwrap_or_default(),
    );
}

pub async fn run_command(
    command: Commands,
    store: Arc<dyn TaskStore>,
    owner: Option<String>,
) -> Result<()> {
    match command {
        Commands::Chat => unreachable!("chat is handled by the caller"),

        Commands::Create {
            title,
            description,
            priority,
            category,
            tags,
            due,
        } => {
            let task = store
                .create(NewTask {
                    owner_id: owner,
                    title,
                    description,
                    status: None,
                    priority: priority.as_deref().map(parse_priority_arg).transpose()?,
                    category,
                    tags: tags
                        .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                        .unwrap_or_default(),
                    due_date: due
                        .as_deref()
                        .map(|d| {
                            crate::executor::parse_due_date(d)
                                .with_context(|| format!("unparseable due date '{d}'"))
                        })
                        .transpose()?,
                })
                .await?;
            println!("Created task {}", task.id);
            print_task_line(&task);
        }

        Commands::List {
            status,
            priority,
            category,
            limit,
        } => {
            let tasks = store
                .list(&TaskFilter {
                    owner_id: owner,
                    status: status.as_deref().map(parse_status_arg).transpose()?,
                    priority: priority.as_deref().map(parse_priority_arg).transpose()?,
                    category,
                    due_before: None,
                    limit,
                })
                .await?;
            for task in &tasks {
                print_task_line(task);
            }
            println!("{} task(s)", tasks.len());
        }

        Commands::Update {
            id,
            title,
            description,
            status,
            priority,
            category,
            due,
        } => {
            let patch = TaskPatch {
                title,
                description,
                status: status.as_deref().map(parse_status_arg).transpose()?,
                priority: priority.as_deref().map(parse_priority_arg).transpose()?,
                category,
                tags: None,
                due_date: due
                    .as_deref()
                    .map(|d| {
                        crate::executor::parse_due_date(d)
                            .with_context(|| format!("unparseable due date '{d}'"))
                    })
                    .transpose()?,
            };
            match store.update(&id, patch).await? {
                Some(task) => print_task_line(&task),
                None => println!("No task with id {id}"),
            }
        }

        Commands::Delete { id } => {
            if store.delete(&id).await? {
                println!("Deleted {id}");
            } else {
                println!("No task with id {id}");
            }
        }

        Commands::Search { term } => {
            let tasks = store.search(&term, owner.as_deref()).await?;
            for task in &tasks {
                print_task_line(task);
            }
            println!("{} match(es)", tasks.len());
        }

        Commands::Export { output } => {
            let tasks = store
                .list(&TaskFilter {
                    owner_id: owner,
                    limit: Some(i64::MAX),
                    ..Default::default()
                })
                .await?;
            let json = serde_json::to_string_pretty(&tasks)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported {} task(s) to {}", tasks.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}
