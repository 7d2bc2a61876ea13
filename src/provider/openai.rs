//! OpenAI-compatible chat-completions provider.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{CalvoxError, Result};
use crate::tools::{ToolCall, ToolSchema};

use super::{ChatMessage, ChatProvider, ChatResponse, ChatRole};

pub struct OpenAiChatProvider {
    http: reqwest::Client,
    base: String,
    api_key: String,
    model: String,
}

impl OpenAiChatProvider {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatResponse> {
        let body = build_request_body(&self.model, messages, tools);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalvoxError::Upstream(format!("model request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CalvoxError::Upstream(format!("model response unreadable: {e}")))?;
        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(CalvoxError::Upstream(format!(
                "model API returned {status}: {snippet}"
            )));
        }

        let parsed = parse_response(&text)?;
        debug!(
            tool_calls = parsed.tool_calls.len(),
            "model completion received"
        );
        Ok(parsed)
    }
}

fn build_request_body(model: &str, messages: &[ChatMessage], tools: &[ToolSchema]) -> Value {
    let wire_messages: Vec<Value> = messages.iter().map(message_to_wire).collect();
    let mut body = json!({
        "model": model,
        "temperature": 0,
        "messages": wire_messages,
    });
    if !tools.is_empty() {
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(wire_tools);
    }
    body
}

fn message_to_wire(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::System => json!({"role": "system", "content": message.content}),
        ChatRole::User => json!({"role": "user", "content": message.content}),
        ChatRole::Assistant => {
            let mut wire = json!({"role": "assistant", "content": message.content});
            if message.has_tool_calls() {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                // The wire format carries arguments as a JSON string.
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                wire["tool_calls"] = json!(calls);
            }
            wire
        }
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
    }
}

#[derive(Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn parse_response(body: &str) -> Result<ChatResponse> {
    let completion: WireCompletion = serde_json::from_str(body)
        .map_err(|e| CalvoxError::Upstream(format!("unexpected model response shape: {e}")))?;
    let message = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CalvoxError::Upstream("model returned no choices".into()))?
        .message;

    let mut tool_calls = Vec::with_capacity(message.tool_calls.len());
    for call in message.tool_calls {
        // A tool call whose arguments are not valid JSON is corrupted
        // structure, not an upstream hiccup: it aborts the turn and resets
        // the user's history.
        let arguments: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
            CalvoxError::MalformedToolCall(format!(
                "tool call {} for '{}' has unparsable arguments: {e}",
                call.id, call.function.name
            ))
        })?;
        tool_calls.push(ToolCall::new(call.id, call.function.name, arguments));
    }

    Ok(ChatResponse {
        content: message.content.unwrap_or_default(),
        tool_calls,
    })
}
