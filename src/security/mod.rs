//! Security module for vetting model-requested commands
//!
//! Every command the model asks for passes a [`CommandPolicy`] before it may reach
//! the persistent shell:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TOOL_CALL: run_shell "<command>"                               │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  CommandPolicy::evaluate                                        │
//! │                                                                 │
//! │   allowed ──► PersistentShell::run                              │
//! │   denied  ──► "Guardrail blocked command: <reason>" (no exec)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The default policy, [`SafetyGuardrail`], is a deny-list over the executable name.
//! It is a speed bump, not a sandbox.

pub mod guardrail;

pub use guardrail::{CommandPolicy, CommandVerdict, SafetyGuardrail, DEFAULT_DENIED_EXECUTABLES};
