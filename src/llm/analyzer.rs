// src/llm/analyzer.rs
//! Intent extraction over the chat-completions API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::client::{first_tool_call, OpenAiClient};
use super::functions::task_function_schemas;
use super::{FunctionCall, IntentAnalysis, IntentBackend};
use crate::context::ContextSnapshot;

const ANALYZE_SYSTEM_PROMPT: &str = "\
You are the intent classifier of a task-management assistant. Read the \
user's message together with the conversation context and call \
`report_intent` exactly once. Use the context to interpret references like \
'that task' or a partial title: put the reference text into task_reference, \
do not guess ids. If the message asks for several actions at once, fill \
`operations` with one entry per action in execution order. Confidence \
reflects how sure you are the chosen action and entities are what the user \
meant.";

/// Tool schema the classifier must call. Mirrors `IntentAnalysis`.
fn report_intent_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "report_intent",
            "description": "Report the structured interpretation of the user's message",
            "parameters": {
                "type": "object",
                "properties": {
                    "primary_action": {
                        "type": "string",
                        "enum": ["create", "read", "update", "delete", "search", "analyze", "other"]
                    },
                    "entities": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "new_title": { "type": "string" },
                            "description": { "type": "string" },
                            "status": { "type": "string" },
                            "priority": { "type": "string" },
                            "category": { "type": "string" },
                            "tags": { "type": "array", "items": { "type": "string" } },
                            "due_date": { "type": "string" },
                            "deadline": { "type": "string" },
                            "task_id": { "type": "string" },
                            "task_reference": { "type": "string" },
                            "search_term": { "type": "string" },
                            "bulk_delete": { "type": "boolean" }
                        }
                    },
                    "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "instructions": { "type": "string" },
                    "operations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "order": { "type": "integer" },
                                "action": { "type": "string" },
                                "entities": { "type": "object" }
                            },
                            "required": ["order", "action"]
                        }
                    }
                },
                "required": ["primary_action", "confidence"]
            }
        }
    })
}

/// Production backend over an OpenAI-compatible endpoint.
pub struct OpenAiBackend {
    client: OpenAiClient,
}

impl OpenAiBackend {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    fn context_message(snapshot: &ContextSnapshot) -> Value {
        let context = serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string());
        json!({
            "role": "system",
            "content": format!("Conversation context:\n{context}")
        })
    }
}

#[async_trait]
impl IntentBackend for OpenAiBackend {
    async fn analyze(&self, utterance: &str, snapshot: &ContextSnapshot) -> IntentAnalysis {
        let messages = vec![
            json!({ "role": "system", "content": ANALYZE_SYSTEM_PROMPT }),
            Self::context_message(snapshot),
            json!({ "role": "user", "content": utterance }),
        ];

        let response = match self
            .client
            .chat_with_tools(
                messages,
                vec![report_intent_schema()],
                Some(json!({ "type": "function", "function": { "name": "report_intent" } })),
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("intent analysis call failed: {e:#}");
                return IntentAnalysis::fallback(utterance);
            }
        };

        let Some((name, arguments)) = first_tool_call(&response) else {
            warn!("intent analysis returned no tool call");
            return IntentAnalysis::fallback(utterance);
        };
        if name != "report_intent" {
            warn!("intent analysis returned unexpected tool '{name}'");
            return IntentAnalysis::fallback(utterance);
        }

        match serde_json::from_value::<IntentAnalysis>(arguments) {
            Ok(mut analysis) => {
                analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
                debug!(
                    action = analysis.primary_action.as_str(),
                    confidence = analysis.confidence,
                    operations = analysis.operations.len(),
                    "intent analyzed"
                );
                analysis
            }
            Err(e) => {
                warn!("intent analysis arguments unparseable: {e}");
                IntentAnalysis::fallback(utterance)
            }
        }
    }

    async fn function_call(
        &self,
        analysis: &IntentAnalysis,
        snapshot: &ContextSnapshot,
    ) -> Option<FunctionCall> {
        let request = analysis
            .instructions
            .clone()
            .unwrap_or_else(|| analysis.primary_action.as_str().to_string());

        let messages = vec![
            json!({
                "role": "system",
                "content": "Map the user's request onto exactly one of the available \
                            task functions. If none fits, answer without calling a function."
            }),
            Self::context_message(snapshot),
            json!({ "role": "user", "content": request }),
        ];

        let response = self
            .client
            .chat_with_tools(messages, task_function_schemas(), None)
            .await
            .map_err(|e| warn!("function-call fallback failed: {e:#}"))
            .ok()?;

        first_tool_call(&response).map(|(name, arguments)| FunctionCall { name, arguments })
    }
}
