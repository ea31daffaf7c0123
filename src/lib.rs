//! clawmini - a text-driven agent that lets a language model work in a shell
//!
//! The model answers in plain text or asks for a command with
//! `TOOL_CALL: {"name": "run_shell", "args": "..."}`. Commands are vetted by a
//! guardrail, run in one persistent bash process, and their output is fed back
//! until the model answers.
//!
//! # Modules
//!
//! - `agent` - the model/shell loop and session persistence
//! - `tools` - action parsing and execution
//! - `shell` - the persistent interpreter process
//! - `security` - command guardrail
//! - `transport` - model provider adapters and registry
//! - `conversation` - transcript types
//! - `config` - environment settings
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - tracing and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use clawmini::{AgentConfig, AgentController, SafetyGuardrail, ShellConfig, ToolExecutor};
//!
//! let transport = clawmini::transport::build_transport("openai", None)?;
//! let executor = ToolExecutor::spawn(SafetyGuardrail::new(), ShellConfig::with_workdir("./workspace"))?;
//! let mut agent = AgentController::new(transport, executor, AgentConfig::default());
//!
//! let mut messages = vec![ConversationMessage::user("list files")];
//! let result = agent.run(&mut messages, None).await?;
//! agent.close().await;
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod metrics;
pub mod security;
pub mod shell;
pub mod telemetry;
pub mod tools;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentError, AgentResult, Session, SessionStore};
pub use conversation::{ConversationMessage, Role};
pub use security::{CommandPolicy, SafetyGuardrail};
pub use shell::{PersistentShell, ShellConfig};
pub use tools::{ActionRequest, ActionResult, ActionStatus, ToolExecutor};
pub use transport::{ModelTransport, TransportError};
