//! HTTP/WebSocket boundary.
//!
//! Two routes, both thin: `POST /chat` authenticates a bearer token and
//! hands the message to the agent loop; `GET /realtime` upgrades to a
//! WebSocket, authenticates (token query parameter or bearer header), and
//! runs a duplex session until the client disconnects. Everything
//! interesting happens behind these handlers.

use std::sync::Arc;

use axum::extract::ws::{self, CloseFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::agent::{AgentLoop, ContextBuilder};
use crate::auth::Identity;
use crate::config::Config;
use crate::error::Result;
use crate::realtime::{ClientSink, DuplexSession, OpenAiRealtime};
use crate::timeutil::{self, NowInfo};
use crate::tools::ToolRegistry;

/// Shared server state. Cheap to clone; everything heavy is behind an Arc.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<AgentLoop>,
    pub registry: Arc<ToolRegistry>,
    pub auth: Arc<dyn Identity>,
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/realtime", get(realtime_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Not authenticated"})),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    /// Timezone offset like "+05:30"; absent means UTC.
    timezone: Option<String>,
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized();
    };
    let user_id = match state.auth.verify(&token) {
        Ok(user_id) => user_id,
        Err(_) => return unauthorized(),
    };

    let offset = timeutil::parse_offset(payload.timezone.as_deref());
    info!(user_id, "chat message received");
    let response = state
        .agent
        .handle_message(&user_id, &payload.message, offset)
        .await;
    Json(json!({"response": response})).into_response()
}

#[derive(Debug, Deserialize)]
struct RealtimeParams {
    token: Option<String>,
    timezone: Option<String>,
}

async fn realtime_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
    headers: HeaderMap,
) -> Response {
    // The browser WebSocket API cannot set headers, so the token may arrive
    // as a query parameter instead.
    let token = params.token.clone().or_else(|| bearer_token(&headers));
    ws.on_upgrade(move |socket| handle_realtime_socket(socket, state, token, params.timezone))
}

async fn handle_realtime_socket(
    mut socket: WebSocket,
    state: AppState,
    token: Option<String>,
    timezone: Option<String>,
) {
    let user_id = match token.as_deref().map(|t| state.auth.verify(t)) {
        Some(Ok(user_id)) => user_id,
        _ => {
            warn!("realtime connection rejected: authentication failed");
            let _ = socket
                .send(ws::Message::Close(Some(CloseFrame {
                    code: ws::close_code::POLICY,
                    reason: "Authentication failed".into(),
                })))
                .await;
            return;
        }
    };
    let offset = timeutil::parse_offset(timezone.as_deref());
    info!(user_id, "realtime connection established");

    // Confirm the connection before the model handshake so the client can
    // start capturing audio immediately.
    let confirmation = json!({"type": "connection.update", "status": "connected"});
    if socket
        .send(ws::Message::Text(confirmation.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let model = match OpenAiRealtime::connect(
        &state.config.realtime_api_base,
        &state.config.realtime_model,
        &state.config.model_api_key,
    )
    .await
    {
        Ok(model) => Arc::new(model),
        Err(e) => {
            warn!(error = %e, "realtime model connection failed");
            let _ = socket
                .send(ws::Message::Close(Some(CloseFrame {
                    code: ws::close_code::ERROR,
                    reason: "Upstream connection failed".into(),
                })))
                .await;
            return;
        }
    };

    let instructions = ContextBuilder::system_prompt(&NowInfo::capture());
    let session = match DuplexSession::connect(
        model,
        Arc::clone(&state.registry),
        user_id,
        offset,
        &instructions,
        &state.config.realtime_voice,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "duplex session setup failed");
            return;
        }
    };

    let (ws_tx, mut ws_rx) = socket.split();
    let outbound = session.spawn_outbound(WsClientSink { sink: ws_tx });

    // Inbound relay: binary frames are audio; a close frame or transport
    // error ends the session; anything else is logged and ignored.
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(ws::Message::Binary(audio)) => {
                if session.ingest_audio(&audio).await.is_err() {
                    break;
                }
            }
            Ok(ws::Message::Close(_)) => {
                debug!(session = %session.id(), "client requested disconnect");
                break;
            }
            Ok(other) => {
                debug!(session = %session.id(), frame = ?other, "ignoring non-audio frame");
            }
            Err(e) => {
                debug!(session = %session.id(), error = %e, "client connection lost");
                break;
            }
        }
    }

    session.drain(outbound).await;
}

/// Adapts the client half of the WebSocket to the session's sink contract.
struct WsClientSink {
    sink: SplitSink<WebSocket, ws::Message>,
}

#[async_trait::async_trait]
impl ClientSink for WsClientSink {
    async fn forward(&mut self, event: Value) -> Result<()> {
        self.sink
            .send(ws::Message::Text(event.to_string().into()))
            .await
            .map_err(|_| crate::error::CalvoxError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::auth::SessionAuth;
    use crate::error::CalvoxError;
    use crate::history::HistoryStore;
    use crate::provider::{ChatMessage, ChatProvider, ChatResponse};
    use crate::tools::ToolSchema;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    struct CannedProvider;

    #[async_trait::async_trait]
    impl ChatProvider for CannedProvider {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
        ) -> std::result::Result<ChatResponse, CalvoxError> {
            Ok(ChatResponse {
                content: "canned reply".into(),
                tool_calls: Vec::new(),
            })
        }
    }

    fn test_state() -> (AppState, SessionAuth) {
        let auth = SessionAuth::new("test-secret");
        let registry = Arc::new(ToolRegistry::new());
        let agent = Arc::new(AgentLoop::new(
            Arc::new(CannedProvider),
            Arc::clone(&registry),
            Arc::new(HistoryStore::new_memory()),
            AgentConfig::default(),
        ));
        let state = AppState {
            agent,
            registry,
            auth: Arc::new(SessionAuth::new("test-secret")),
            config: Config {
                model_api_key: "test-key".into(),
                chat_model: "test-model".into(),
                realtime_model: "test-realtime".into(),
                realtime_voice: "alloy".into(),
                chat_api_base: "http://localhost:0".into(),
                realtime_api_base: "ws://localhost:0".into(),
                calendar_api_base: "http://localhost:0".into(),
                jwt_secret: "test-secret".into(),
                bind_addr: "127.0.0.1:0".into(),
            },
        };
        (state, auth)
    }

    fn chat_request(token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_chat_requires_bearer_token() {
        let (state, _) = test_state();
        let app = router(state);
        let response = app
            .oneshot(chat_request(None, json!({"message": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_rejects_invalid_token() {
        let (state, _) = test_state();
        let app = router(state);
        let response = app
            .oneshot(chat_request(Some("bogus"), json!({"message": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let (state, auth) = test_state();
        let token = auth.issue("alice").unwrap();
        let app = router(state);
        let response = app
            .oneshot(chat_request(
                Some(&token),
                json!({"message": "hello", "timezone": "+05:30"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["response"], "canned reply");
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
