//! Agent module - turn-taking loop between the model and the calendar tools
//!
//! This module provides the request/response half of the assistant. The
//! agent is responsible for:
//!
//! - Building the augmented prompt (date context, tool rules, recent history)
//! - Calling the chat-model provider with the tool schemas bound
//! - Dispatching tool calls and feeding results back to the model, in order
//! - Persisting the final user/assistant exchange, and nothing else
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │ POST /chat  │────>│  AgentLoop  │────>│ ChatProvider │
//! │  (server)   │     │             │     │   (model)    │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌──────────────┐
//!                     │   History   │     │     Tool     │
//!                     │    Store    │     │   Registry   │
//!                     └─────────────┘     └──────────────┘
//! ```
//!
//! The duplex realtime session (`crate::realtime`) shares the registry but
//! not this loop: its turn-taking is driven by the speech model itself.

mod context;
mod r#loop;

pub use context::ContextBuilder;
pub use r#loop::{AgentConfig, AgentLoop, APOLOGY, RESET_APOLOGY};
