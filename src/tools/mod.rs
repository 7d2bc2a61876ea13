//! Tool dispatch shared by the agent loop and the duplex session.
//!
//! A [`Tool`] declares a name, a description and a JSON-schema parameter
//! object, and executes against a [`ToolContext`] carrying the caller's
//! identity and timezone offset. The model never supplies either; dispatch
//! injects them. [`ToolRegistry::dispatch`] converts every outcome,
//! including failures, into a text [`ToolResult`]: the consumer is a model
//! that only reads text, so errors must arrive as words, not as panics or
//! propagated `Err`s.

pub mod calendar;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::FixedOffset;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// A structured tool request produced by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The text outcome of one tool call, matched 1:1 by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Caller identity and timezone, injected by dispatch rather than trusted
/// from model-supplied arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub timezone: FixedOffset,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>, timezone: FixedOffset) -> Self {
        Self {
            user_id: user_id.into(),
            timezone,
        }
    }
}

/// A callable operation exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as the model addresses it.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameters(&self) -> Value;

    /// Execute with model-supplied arguments. An `Err` is a *user-facing*
    /// failure: dispatch renders it into the result text.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;
}

/// Declared schema of one tool, for binding into model requests.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Static mapping from tool name to operation.
///
/// # Example
///
/// ```
/// use calvox::timeutil::parse_offset;
/// use calvox::tools::{ToolCall, ToolContext, ToolRegistry};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let registry = ToolRegistry::new();
/// let ctx = ToolContext::new("alice", parse_offset(None));
///
/// // Dispatch never fails: an unknown tool becomes an error-text result.
/// let result = registry.dispatch(&ToolCall::new("c1", "nope", json!({})), &ctx).await;
/// assert!(result.is_error);
/// # });
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declared schemas in registration order, for binding to the model.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Dispatch one call. Never returns an error: an unknown tool or a
    /// failing execution becomes an error-text result the model can read.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            return ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("Error: unknown tool: {}", call.name),
                is_error: true,
            };
        };

        debug!(tool = %call.name, user_id = %ctx.user_id, "dispatching tool call");
        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(content) => ToolResult {
                tool_call_id: call.id.clone(),
                content,
                is_error: false,
            },
            Err(e) => ToolResult {
                tool_call_id: call.id.clone(),
                content: format!("Error: {e}"),
                is_error: true,
            },
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
