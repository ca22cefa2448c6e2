// src/llm/client.rs

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::CONFIG;

/// Thin client for any OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    pub client: Client,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

impl OpenAiClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CONFIG.llm_timeout))
            .build()?;

        Ok(Self {
            client,
            api_key: CONFIG.openai_api_key.clone(),
            api_base: CONFIG.openai_base_url.clone(),
            model: CONFIG.model.clone(),
        })
    }

    /// Request builder for JSON endpoints.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(
                method,
                format!(
                    "{}/{}",
                    self.api_base.trim_end_matches('/'),
                    path.trim_start_matches('/')
                ),
            )
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    /// Chat completion with function calling support.
    pub async fn chat_with_tools(
        &self,
        messages: Vec<Value>,
        tools: Vec<Value>,
        tool_choice: Option<Value>,
    ) -> Result<Value> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": CONFIG.intent_temperature,
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools);
            payload["tool_choice"] = tool_choice.unwrap_or_else(|| json!("auto"));
        }

        let response = self
            .request(Method::POST, "chat/completions")
            .json(&payload)
            .send()
            .await
            .context("Failed to send chat request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!("LLM API error {}: {}", status, error_text));
        }

        let response_json: Value = response.json().await.context("Failed to parse response")?;
        Ok(response_json)
    }
}

/// Extract the first tool call (name, arguments) from a chat-completions
/// response. Arguments arrive as a JSON string and are parsed here.
pub fn first_tool_call(response: &Value) -> Option<(String, Value)> {
    let call = response["choices"][0]["message"]["tool_calls"][0].clone();
    let name = call["function"]["name"].as_str()?.to_string();
    let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
    let arguments = serde_json::from_str(raw_args).ok()?;
    Some((name, arguments))
}
