//! Agent module - the model/shell loop and conversation persistence
//!
//! # Architecture
//!
//! ```text
//! User input → AgentController → ModelTransport::generate(transcript)
//!                  ↓
//!           reply contains TOOL_CALL: {...} ?
//!                  ↓ yes                         ↓ no
//!           ToolExecutor::execute           final answer
//!             (guardrail → shell)
//!                  ↓
//!           tool_output appended → next model call
//! ```
//!
//! `SessionStore` keeps transcripts on disk between runs.

pub mod controller;
pub mod sessions;

pub use controller::{
    AgentConfig, AgentController, AgentError, AgentResult, TurnOutcome,
    DEFAULT_AGENT_SYSTEM_PROMPT,
};
pub use sessions::{Session, SessionError, SessionStore, SESSION_ID_FORMAT};
