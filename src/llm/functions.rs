// src/llm/functions.rs
//! Closed set of functions the fallback path may return, with typed
//! argument decoders. Unknown names decode to an error string that the
//! executor surfaces as an "unsupported operation" result instead of
//! dispatching on arbitrary model output.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CreateTaskArgs {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpdateTaskArgs {
    pub task_identifier: Option<String>,
    /// Older prompt revisions emitted `id`; keep accepting it.
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub due_date: Option<String>,
}

impl UpdateTaskArgs {
    pub fn identifier(&self) -> Option<&str> {
        self.task_identifier.as_deref().or(self.id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeleteTaskArgs {
    pub task_identifier: Option<String>,
    pub id: Option<String>,
}

impl DeleteTaskArgs {
    pub fn identifier(&self) -> Option<&str> {
        self.task_identifier.as_deref().or(self.id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ListTasksArgs {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SearchTasksArgs {
    pub term: String,
}

/// The recognized fallback functions.
#[derive(Debug, Clone)]
pub enum TaskFunction {
    CreateTask(CreateTaskArgs),
    UpdateTask(UpdateTaskArgs),
    DeleteTask(DeleteTaskArgs),
    ListTasks(ListTasksArgs),
    SearchTasks(SearchTasksArgs),
}

impl TaskFunction {
    /// Decode a named function call. Err carries the offending name.
    pub fn decode(name: &str, arguments: &Value) -> Result<Self, String> {
        let decode_err = |e: serde_json::Error| format!("{name}: {e}");
        match name {
            "create_task" => serde_json::from_value(arguments.clone())
                .map(TaskFunction::CreateTask)
                .map_err(decode_err),
            "update_task" => serde_json::from_value(arguments.clone())
                .map(TaskFunction::UpdateTask)
                .map_err(decode_err),
            "delete_task" => serde_json::from_value(arguments.clone())
                .map(TaskFunction::DeleteTask)
                .map_err(decode_err),
            "list_tasks" => serde_json::from_value(arguments.clone())
                .map(TaskFunction::ListTasks)
                .map_err(decode_err),
            "search_tasks" => serde_json::from_value(arguments.clone())
                .map(TaskFunction::SearchTasks)
                .map_err(decode_err),
            other => Err(other.to_string()),
        }
    }
}

/// Tool definitions sent to the model on the fallback path.
pub fn task_function_schemas() -> Vec<Value> {
    vec![
        tool(
            "create_task",
            "Create a new task",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "priority": { "type": "string", "enum": ["low", "medium", "high", "urgent"] },
                    "category": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "due_date": { "type": "string", "description": "ISO date or 'today'/'tomorrow'" }
                },
                "required": ["title"]
            }),
        ),
        tool(
            "update_task",
            "Update fields of an existing task",
            json!({
                "type": "object",
                "properties": {
                    "task_identifier": { "type": "string", "description": "Task id or a title fragment" },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "status": { "type": "string", "enum": ["pending", "in_progress", "completed", "cancelled"] },
                    "priority": { "type": "string", "enum": ["low", "medium", "high", "urgent"] },
                    "category": { "type": "string" },
                    "due_date": { "type": "string" }
                },
                "required": ["task_identifier"]
            }),
        ),
        tool(
            "delete_task",
            "Delete a single task",
            json!({
                "type": "object",
                "properties": {
                    "task_identifier": { "type": "string", "description": "Task id or a title fragment" }
                },
                "required": ["task_identifier"]
            }),
        ),
        tool(
            "list_tasks",
            "List tasks, optionally filtered",
            json!({
                "type": "object",
                "properties": {
                    "status": { "type": "string" },
                    "priority": { "type": "string" },
                    "category": { "type": "string" }
                }
            }),
        ),
        tool(
            "search_tasks",
            "Search tasks by free text",
            json!({
                "type": "object",
                "properties": {
                    "term": { "type": "string" }
                },
                "required": ["term"]
            }),
        ),
    ]
}

fn tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters
        }
    })
}
