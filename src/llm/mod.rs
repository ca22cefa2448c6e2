// src/llm/mod.rs
//! LLM boundary: intent extraction and function-calling fallback.
//!
//! The rest of the system only sees `IntentBackend` and the structured
//! `IntentAnalysis` it returns. A failed or unparseable model response
//! becomes a low-confidence analysis, never an error.

pub mod analyzer;
pub mod client;
pub mod functions;

pub use analyzer::OpenAiBackend;
pub use client::OpenAiClient;
pub use functions::TaskFunction;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;

// ============================================================================
// Intent types
// ============================================================================

/// The action the user asked for, as classified by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Search,
    Analyze,
    /// Anything the classifier did not map onto a known verb. Routed through
    /// the function-calling fallback.
    Other(String),
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "create" | "add" => Action::Create,
            "read" | "list" => Action::Read,
            "update" | "edit" => Action::Update,
            "delete" | "remove" => Action::Delete,
            "search" | "find" => Action::Search,
            "analyze" | "stats" => Action::Analyze,
            other => Action::Other(other.to_string()),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_str().to_string()
    }
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Search => "search",
            Action::Analyze => "analyze",
            Action::Other(s) => s,
        }
    }
}

/// Raw entity bag as the model returns it. Loosely typed by necessity;
/// the executor validates it into per-action records before touching
/// the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EntityBag {
    pub title: Option<String>,
    pub new_title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<String>,
    pub deadline: Option<String>,
    pub task_id: Option<String>,
    pub task_reference: Option<String>,
    pub search_term: Option<String>,
    pub bulk_delete: Option<bool>,
}

/// One step of a multi-operation utterance ("create X then delete Y").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub order: i32,
    pub action: Action,
    #[serde(default)]
    pub entities: EntityBag,
}

/// Structured interpretation of a user utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub primary_action: Action,
    #[serde(default)]
    pub entities: EntityBag,
    /// Clamped to [0, 1].
    pub confidence: f32,
    /// Free-text remainder the classifier could not place in an entity.
    #[serde(default)]
    pub instructions: Option<String>,
    /// More than one entry triggers the multi-operation path.
    #[serde(default)]
    pub operations: Vec<PlannedOperation>,
}

impl IntentAnalysis {
    /// Fallback analysis when the model call fails or returns garbage.
    /// Confidence 0.0 guarantees the executor asks for clarification
    /// instead of acting.
    pub fn fallback(utterance: &str) -> Self {
        Self {
            primary_action: Action::Other("unknown".to_string()),
            entities: EntityBag::default(),
            confidence: 0.0,
            instructions: Some(utterance.to_string()),
            operations: Vec::new(),
        }
    }

    pub fn is_multi_operation(&self) -> bool {
        self.operations.len() > 1
    }
}

/// A function call returned by the fallback path, not yet decoded into the
/// closed `TaskFunction` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

// ============================================================================
// Backend trait
// ============================================================================

/// External LLM oracle. Implementations must be infallible at the type
/// level: whatever happens on the wire, `analyze` returns a structurally
/// valid analysis.
#[async_trait]
pub trait IntentBackend: Send + Sync {
    async fn analyze(&self, utterance: &str, snapshot: &ContextSnapshot) -> IntentAnalysis;

    /// Fallback for unrecognized primary actions. None means the model
    /// declined to pick a function.
    async fn function_call(
        &self,
        analysis: &IntentAnalysis,
        snapshot: &ContextSnapshot,
    ) -> Option<FunctionCall>;
}
