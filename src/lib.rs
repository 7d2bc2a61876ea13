//! Calvox - voice and text calendar assistant
//!
//! A model decides, turn by turn, whether to answer directly or invoke
//! calendar operations (availability checks, slot search, event creation,
//! upcoming-events listing) against the user's calendar. The same tool set
//! is exposed two ways:
//!
//! - [`agent::AgentLoop`]: request/response, one user message in, one
//!   spoken-friendly answer out, with tool dispatch in between.
//! - [`realtime::DuplexSession`]: a live bidirectional audio stream to a
//!   hosted speech model, with tool calls intercepted mid-stream.
//!
//! Both sit on [`tools::ToolRegistry`] → [`calendar::CalendarToolEngine`] →
//! [`timeutil`], and on collaborator traits for everything external:
//! identity, conversation history, credential storage, the calendar API and
//! the model connections.

pub mod agent;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod error;
pub mod history;
pub mod provider;
pub mod realtime;
pub mod server;
pub mod timeutil;
pub mod tools;

pub use error::{CalvoxError, Result};
