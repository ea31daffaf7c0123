//! Model-facing tools
//!
//! ```text
//! model text ──parse_action_request──► ActionRequest ──ToolExecutor::execute──► ActionResult
//!                                                           │
//!                                               CommandPolicy → PersistentShell
//! ```
//!
//! Only one action exists: `run_shell`.

pub mod action;
pub mod executor;
pub mod parse;

pub use action::{ActionName, ActionRequest, ActionResult, ActionStatus, RUN_SHELL};
pub use executor::{ToolExecutor, DEFAULT_COMMAND_TIMEOUT};
pub use parse::{parse_action_request, ACTION_MARKER};
