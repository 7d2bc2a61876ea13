//! The turn-taking agent loop.
//!
//! Two states: `Thinking` (call the model, dispatch any tool calls, repeat)
//! and `Done` (the model answered without tools). The model decides when to
//! stop; the loop adds an explicit turn bound on top so a model that never
//! stops calling tools cannot spin forever.
//!
//! Per invocation, exactly one user turn and (on success) one final
//! assistant turn are persisted. Tool turns live only inside the
//! invocation's request window.

use std::sync::Arc;

use chrono::FixedOffset;
use tracing::{error, info, warn};

use crate::error::{CalvoxError, Result};
use crate::history::{ConversationHistory, Turn};
use crate::provider::{ChatMessage, ChatProvider};
use crate::tools::{ToolContext, ToolRegistry};

use super::ContextBuilder;

/// Fixed reply when a turn aborts. Phrased for speech, like every other
/// user-facing string.
pub const APOLOGY: &str = "I ran into a problem handling that request. Please try again.";

/// Fixed reply when the persisted history had to be reset.
pub const RESET_APOLOGY: &str =
    "I encountered an error with the previous conversation. Please try your request again.";

/// Loop configuration. Immutable; constructed once and shared.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on model invocations per user message.
    pub max_turns: usize,
    /// How many persisted turns are replayed into the request window.
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 8,
            history_window: 10,
        }
    }
}

/// Synchronous turn-taking state machine between one user message and one
/// final spoken answer. Stateless across invocations: conversation state
/// lives in the history collaborator, and concurrent invocations for
/// different users share nothing else.
pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    history: Arc<dyn ConversationHistory>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        history: Arc<dyn ConversationHistory>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            history,
            config,
        }
    }

    /// Handle one user message and always produce a speakable reply.
    ///
    /// Loop-level failures abort the turn and return a fixed apology; a
    /// corrupted tool-call structure additionally resets the user's
    /// persisted history, because replaying it would reproduce the failure
    /// on every subsequent turn.
    pub async fn handle_message(
        &self,
        user_id: &str,
        message: &str,
        offset: FixedOffset,
    ) -> String {
        match self.run_turn(user_id, message, offset).await {
            Ok(answer) => answer,
            Err(e) if e.is_malformed_tool_call() => {
                warn!(user_id, error = %e, "corrupted tool-call structure; resetting history");
                if let Err(clear_err) = self.history.clear(user_id).await {
                    error!(user_id, error = %clear_err, "history reset failed");
                }
                RESET_APOLOGY.to_string()
            }
            Err(e) => {
                error!(user_id, error = %e, "agent turn aborted");
                APOLOGY.to_string()
            }
        }
    }

    async fn run_turn(
        &self,
        user_id: &str,
        message: &str,
        offset: FixedOffset,
    ) -> Result<String> {
        let mut messages = ContextBuilder::new(self.config.history_window)
            .build(self.history.as_ref(), user_id, message)
            .await?;
        self.history.append(user_id, Turn::user(message)).await?;

        let schemas = self.registry.schemas();
        let ctx = ToolContext::new(user_id, offset);

        for _ in 0..self.config.max_turns {
            let response = self.provider.complete(&messages, &schemas).await?;

            if !response.has_tool_calls() {
                self.history
                    .append(user_id, Turn::assistant(&response.content))
                    .await?;
                return Ok(response.content);
            }

            info!(
                user_id,
                calls = response.tool_calls.len(),
                "model requested tool calls"
            );
            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Results go back in the same order the calls were issued; the
            // model correlates them by position as well as by id.
            for call in &response.tool_calls {
                let result = self.registry.dispatch(call, &ctx).await;
                messages.push(ChatMessage::tool_result(result.tool_call_id, result.content));
            }
        }

        Err(CalvoxError::TooManyIterations(self.config.max_turns))
    }
}
