//! Configuration loaded from the environment.
//!
//! Every value comes from environment variables (a `.env` file is honored
//! when present). There is no process-wide config singleton: `Config` is
//! built once in `main` and handed to the components that need it.

use std::path::PathBuf;

use crate::error::{CalvoxError, Result};

/// Runtime configuration for the server and its collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the hosted chat and realtime models.
    pub model_api_key: String,
    /// Chat-completion model used by the agent loop.
    pub chat_model: String,
    /// Realtime speech model used by duplex sessions.
    pub realtime_model: String,
    /// Voice name sent in the realtime session configuration.
    pub realtime_voice: String,
    /// Base URL of the chat-completion API.
    pub chat_api_base: String,
    /// WebSocket URL of the realtime API.
    pub realtime_api_base: String,
    /// Base URL of the calendar REST API.
    pub calendar_api_base: String,
    /// HS256 secret for session tokens.
    pub jwt_secret: String,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Values are whitespace-trimmed to survive Windows line endings in
    /// `.env` files. Only the model API key is mandatory.
    pub fn from_env() -> Result<Self> {
        let model_api_key = env_trimmed("MODEL_API_KEY");
        if model_api_key.is_empty() {
            return Err(CalvoxError::Config("MODEL_API_KEY is not set".into()));
        }

        Ok(Self {
            model_api_key,
            chat_model: env_or("CHAT_MODEL", "gpt-4.1-mini"),
            realtime_model: env_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2024-12-17"),
            realtime_voice: env_or("REALTIME_VOICE", "alloy"),
            chat_api_base: env_or("CHAT_API_BASE", "https://api.openai.com/v1"),
            realtime_api_base: env_or("REALTIME_API_BASE", "wss://api.openai.com/v1/realtime"),
            calendar_api_base: env_or(
                "CALENDAR_API_BASE",
                "https://www.googleapis.com/calendar/v3",
            ),
            jwt_secret: env_or("JWT_SECRET", "dev-secret"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),
        })
    }

    /// Data directory for file-backed stores (`~/.calvox`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".calvox")
    }
}

fn env_trimmed(key: &str) -> String {
    std::env::var(key).unwrap_or_default().trim().to_string()
}

fn env_or(key: &str, default: &str) -> String {
    let value = env_trimmed(key);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}
