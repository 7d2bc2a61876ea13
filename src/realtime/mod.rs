//! Realtime module - duplex audio sessions with the hosted speech model
//!
//! One live WebSocket per client connection, with the same calendar tools
//! the agent loop exposes available to the model mid-stream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  audio frames   ┌───────────────┐  append events  ┌─────────────┐
//! │   Client    │────────────────>│ DuplexSession │────────────────>│ ModelStream │
//! │ (WebSocket) │<────────────────│               │<────────────────│  (speech)   │
//! └─────────────┘  model events   └───────┬───────┘  events (recv)  └─────────────┘
//!                                         │
//!                                         ▼ on function-call events
//!                                  ┌──────────────┐
//!                                  │ ToolRegistry │
//!                                  └──────────────┘
//! ```

mod provider;
mod session;

pub use provider::{ModelStream, OpenAiRealtime};
pub use session::{ClientSink, DuplexSession, SessionPhase};
