//! Error types for calvox
//!
//! One taxonomy shared by both loop types. The boundary rules matter more
//! than the variants themselves:
//!
//! - Tool-level failures never escape the tool boundary: the registry turns
//!   them into text results so the model can speak to the user about them.
//! - Loop-level failures abort only the current turn.
//! - Connection-level failures drain the session; connections are disposable
//!   and reconnection is the client's responsibility. Nothing is retried.

use thiserror::Error;

/// Result type alias used throughout calvox.
pub type Result<T> = std::result::Result<T, CalvoxError>;

/// Error type covering every failure class in the core.
#[derive(Error, Debug)]
pub enum CalvoxError {
    /// The bearer credential could not be resolved to a user.
    #[error("not authenticated")]
    Unauthenticated,

    /// The model named a tool that is not in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// An event's end time is not after its start time.
    #[error("the event end time must be after the start time")]
    InvalidInterval,

    /// The calendar collaborator rejected the stored credentials. Rendered
    /// with the one fixed remediation sentence because it is read to the user.
    #[error(
        "Your calendar access has expired. Please log out and log back in \
         to refresh your calendar permissions."
    )]
    CredentialsExpired,

    /// Calendar or model provider failure, with a short diagnostic.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The model emitted a tool call the loop cannot parse. Triggers a
    /// history reset for the user, since replaying the corrupted turn would
    /// reproduce the failure forever.
    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),

    /// The underlying streaming connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The agent loop hit its configured turn bound without the model
    /// producing a final answer.
    #[error("agent loop exceeded {0} turns without a final answer")]
    TooManyIterations(usize),

    /// Stored calendar credentials not found for a user.
    #[error("no calendar credentials for user {0}")]
    CredentialsNotFound(String),

    /// Tool argument validation failure (missing or mistyped parameter).
    #[error("tool error: {0}")]
    Tool(String),

    /// Configuration problem at startup.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl CalvoxError {
    /// Whether this error signature indicates corrupted tool-call structure,
    /// in which case the agent loop also resets the user's persisted history.
    pub fn is_malformed_tool_call(&self) -> bool {
        matches!(self, CalvoxError::MalformedToolCall(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_expired_remediation_message() {
        let msg = CalvoxError::CredentialsExpired.to_string();
        assert!(msg.contains("log out and log back in"));
    }

    #[test]
    fn test_malformed_tool_call_detection() {
        assert!(CalvoxError::MalformedToolCall("bad args".into()).is_malformed_tool_call());
        assert!(!CalvoxError::Unauthenticated.is_malformed_tool_call());
        assert!(!CalvoxError::Upstream("boom".into()).is_malformed_tool_call());
    }

    #[test]
    fn test_unknown_tool_names_the_tool() {
        let err = CalvoxError::UnknownTool("send_email".into());
        assert!(err.to_string().contains("send_email"));
    }
}
