//! One live duplex session with the speech model.
//!
//! Lifecycle per connection: `Connecting → Active → Draining → Closed`.
//! While `Active`, two flows run concurrently over the single model
//! connection:
//!
//! - **Inbound relay**: client audio frames become base64 append events.
//! - **Outbound relay**: one task performs the blocking receive and forwards
//!   every event to the client verbatim, because the client needs raw
//!   provider events (audio deltas included) for playback. The receive is
//!   not safe to call from two sites, so a session-scoped lock guarantees
//!   exactly one reader.
//!
//! Tool-call completion events are intercepted on the outbound path:
//! dispatch through the shared registry, then two ordered sends, injecting
//! the result as a conversation item and requesting a new response. The live
//! protocol has no function-result channel, so the synthetic message is the
//! compatibility path. No other send may land between those two.
//!
//! Cancellation is cooperative: a stop flag checked at receive boundaries
//! plus a bounded grace join, because the blocking receive cannot be safely
//! interrupted mid-call. Cleanup is idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::FixedOffset;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CalvoxError, Result};
use crate::tools::{ToolCall, ToolContext, ToolRegistry};

use super::ModelStream;

/// How long draining waits for the outbound relay to observe the stop flag
/// before termination is forced.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Backoff after a transient (non-fatal) receive failure.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// Client-facing half of the relay: where forwarded model events go.
#[async_trait]
pub trait ClientSink: Send {
    async fn forward(&mut self, event: Value) -> Result<()>;
}

/// State for one live connection. Owned by that connection's lifetime and
/// destroyed on disconnect or fatal error.
pub struct DuplexSession {
    id: Uuid,
    model: Arc<dyn ModelStream>,
    registry: Arc<ToolRegistry>,
    user_id: String,
    timezone: FixedOffset,
    /// Serializes all sends to the model so the interception's two-event
    /// sequence can never be interleaved.
    send_gate: Mutex<()>,
    /// Enforces the single-reader invariant on the blocking receive.
    recv_gate: Mutex<()>,
    stop: CancellationToken,
    phase: std::sync::Mutex<SessionPhase>,
}

impl DuplexSession {
    /// Open a session: take ownership of a freshly connected model stream
    /// and send the one configuration event (voice, instructions, tool
    /// schemas, turn detection, audio codec). No acknowledgement is awaited
    /// before the session becomes active.
    pub async fn connect(
        model: Arc<dyn ModelStream>,
        registry: Arc<ToolRegistry>,
        user_id: impl Into<String>,
        timezone: FixedOffset,
        instructions: &str,
        voice: &str,
    ) -> Result<Arc<Self>> {
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            model,
            registry,
            user_id: user_id.into(),
            timezone,
            send_gate: Mutex::new(()),
            recv_gate: Mutex::new(()),
            stop: CancellationToken::new(),
            phase: std::sync::Mutex::new(SessionPhase::Connecting),
        });

        let config = session.configuration_event(instructions, voice);
        {
            let _gate = session.send_gate.lock().await;
            session.model.send(config).await?;
        }
        session.set_phase(SessionPhase::Active);
        info!(session = %session.id, user_id = %session.user_id, "duplex session active");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    fn configuration_event(&self, instructions: &str, voice: &str) -> Value {
        let tools: Vec<Value> = self
            .registry
            .schemas()
            .into_iter()
            .map(|s| {
                json!({
                    "type": "function",
                    "name": s.name,
                    "description": s.description,
                    "parameters": s.parameters,
                })
            })
            .collect();

        json!({
            "type": "session.update",
            "session": {
                "voice": voice,
                "instructions": instructions,
                "tools": tools,
                "tool_choice": "auto",
                "temperature": 0.7,
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": 0.5,
                    "prefix_padding_ms": 300,
                    "silence_duration_ms": 500,
                },
                "modalities": ["audio", "text"],
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "input_audio_transcription": {"model": "whisper-1"},
            }
        })
    }

    /// Inbound relay: forward one binary client audio frame to the model as
    /// a base64 append event. Independent of the outbound relay: a slow
    /// tool dispatch never stalls audio ingestion.
    pub async fn ingest_audio(&self, frame: &[u8]) -> Result<()> {
        if self.phase() != SessionPhase::Active {
            debug!(session = %self.id, "dropping audio frame outside Active phase");
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(frame);
        let event = json!({
            "type": "input_audio_buffer.append",
            "audio": audio,
        });
        let _gate = self.send_gate.lock().await;
        self.model.send(event).await
    }

    /// Spawn the outbound relay: the session's only reader of the model
    /// stream. Runs until the stop flag is observed, the model connection
    /// dies, or the client sink fails.
    pub fn spawn_outbound<C: ClientSink + 'static>(self: &Arc<Self>, client: C) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.outbound_loop(client).await;
        })
    }

    async fn outbound_loop<C: ClientSink>(&self, mut client: C) {
        debug!(session = %self.id, "outbound relay started");
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            // Exactly one reader holds the receive at a time. The guard
            // covers only the receive itself: interception and forwarding
            // run with the gate released.
            let received = {
                let _gate = self.recv_gate.lock().await;
                self.model.recv().await
            };

            let event = match received {
                Ok(event) => event,
                Err(CalvoxError::ConnectionClosed) | Err(CalvoxError::WebSocket(_)) => {
                    debug!(session = %self.id, "model connection closed, relay exiting");
                    break;
                }
                Err(e) => {
                    if self.stop.is_cancelled() {
                        break;
                    }
                    warn!(session = %self.id, error = %e, "receive failed, retrying");
                    tokio::time::sleep(RECV_RETRY_DELAY).await;
                    continue;
                }
            };

            let event_type = event
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown");

            if event_type == "error" {
                // Upstream errors reach the client unmodified; the client is
                // expected to surface them to the user.
                warn!(session = %self.id, event = %event, "model reported an error");
            } else if event_type == "response.function_call_arguments.done" {
                self.intercept_tool_call(&event).await;
            }

            if client.forward(event).await.is_err() {
                debug!(session = %self.id, "client sink gone, relay exiting");
                break;
            }
        }
        debug!(session = %self.id, "outbound relay stopped");
    }

    /// Dispatch an intercepted tool call, then perform the two ordered
    /// follow-up sends. The send gate is held across both: the injected
    /// conversation item always precedes the response request, with nothing
    /// in between.
    async fn intercept_tool_call(&self, event: &Value) {
        let call_id = event
            .get("call_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let raw_arguments = event
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");

        info!(session = %self.id, tool = name, call_id, "intercepted tool call");

        let content = match serde_json::from_str::<Value>(raw_arguments) {
            Ok(arguments) => {
                let call = ToolCall::new(call_id, name, arguments);
                let ctx = ToolContext::new(self.user_id.clone(), self.timezone);
                self.registry.dispatch(&call, &ctx).await.content
            }
            Err(e) => format!("Error: tool call arguments were not valid JSON: {e}"),
        };

        // The protocol has no function-result channel; the result rides in
        // as a synthetic assistant message, then a response is requested.
        let item = json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "assistant",
                "content": [{
                    "type": "text",
                    "text": format!("I found the following information: {content}"),
                }],
            }
        });
        let request_response = json!({"type": "response.create"});

        let _gate = self.send_gate.lock().await;
        if let Err(e) = self.model.send(item).await {
            warn!(session = %self.id, error = %e, "failed to inject tool result");
            return;
        }
        if let Err(e) = self.model.send(request_response).await {
            warn!(session = %self.id, error = %e, "failed to request follow-up response");
        }
    }

    /// Drain and close: set the stop flag, close the model connection to
    /// unblock a pending receive, and give the outbound relay a bounded
    /// grace period before forcing termination.
    pub async fn drain(&self, mut outbound: JoinHandle<()>) {
        self.set_phase(SessionPhase::Draining);
        info!(session = %self.id, "draining duplex session");
        self.stop.cancel();
        self.model.close().await;

        if tokio::time::timeout(DRAIN_GRACE, &mut outbound)
            .await
            .is_err()
        {
            warn!(session = %self.id, "outbound relay missed the grace period, aborting");
            outbound.abort();
        }
        self.cleanup().await;
    }

    /// Release the model connection. Safe to invoke any number of times.
    pub async fn cleanup(&self) {
        if self.phase() == SessionPhase::Closed {
            return;
        }
        self.set_phase(SessionPhase::Closed);
        self.stop.cancel();
        self.model.close().await;
        info!(session = %self.id, "duplex session closed");
    }
}
