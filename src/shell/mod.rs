//! Persistent shell execution
//!
//! One interpreter process lives for the whole conversation, so `cd` and `export`
//! carry over from one model action to the next.

pub mod session;

use std::time::Duration;

use async_trait::async_trait;

pub use session::{PersistentShell, ShellConfig, ShellError, ShellOutput, ShellState};

/// Something that can run shell commands for the tool executor
///
/// Implemented by [`PersistentShell`]; tests substitute a recording fake.
#[async_trait]
pub trait CommandRunner: Send {
    /// Run one command with a deadline
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError>;

    /// Whether the runner can accept another command
    fn is_alive(&mut self) -> bool;

    /// Replace a dead runner with a fresh one
    async fn restart(&mut self) -> Result<(), ShellError>;

    /// Release the underlying process; idempotent
    async fn close(&mut self);
}
