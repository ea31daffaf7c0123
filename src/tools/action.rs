//! Action requests parsed from model text and the results fed back to it

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire name of the shell action
pub const RUN_SHELL: &str = "run_shell";

/// Older wire name for the shell action, still accepted
pub const LEGACY_RUN_SHELL: &str = "execute_bash";

/// Name of a requested action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionName {
    RunShell,
    /// Anything the executor does not know how to perform
    Other(String),
}

impl ActionName {
    pub fn parse(name: &str) -> Self {
        match name {
            RUN_SHELL | LEGACY_RUN_SHELL => ActionName::RunShell,
            other => ActionName::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionName::RunShell => RUN_SHELL,
            ActionName::Other(name) => name,
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured request extracted from a `TOOL_CALL:` marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub name: ActionName,
    pub args: Option<String>,
}

impl ActionRequest {
    pub fn new(name: &str, args: Option<String>) -> Self {
        Self {
            name: ActionName::parse(name),
            args,
        }
    }

    pub fn run_shell(command: impl Into<String>) -> Self {
        Self {
            name: ActionName::RunShell,
            args: Some(command.into()),
        }
    }

    /// The command to run, if this is a shell action with a non-blank argument
    pub fn shell_command(&self) -> Option<&str> {
        match self.name {
            ActionName::RunShell => self.args.as_deref().filter(|a| !a.trim().is_empty()),
            ActionName::Other(_) => None,
        }
    }

    /// Whether the executor can carry this request out
    pub fn is_runnable(&self) -> bool {
        self.shell_command().is_some()
    }
}

/// How an action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    /// Refused by the command policy; nothing ran
    Blocked,
    UnknownAction,
    /// The shell could not be reached or restarted
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Blocked => "blocked",
            ActionStatus::UnknownAction => "unknown_action",
            ActionStatus::Failed => "failed",
        }
    }
}

/// Result of one action, serialized into a `tool_output` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub output: String,
}

impl ActionResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Succeeded,
            output: output.into(),
        }
    }

    pub fn blocked(output: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Blocked,
            output: output.into(),
        }
    }

    pub fn unknown_action(output: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::UnknownAction,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            output: output.into(),
        }
    }

    /// JSON text for the transcript
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "status": self.status.as_str(),
            "output": self.output,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_name_aliases() {
        assert_eq!(ActionName::parse("run_shell"), ActionName::RunShell);
        assert_eq!(ActionName::parse("execute_bash"), ActionName::RunShell);
        assert_eq!(
            ActionName::parse("write_file"),
            ActionName::Other("write_file".to_string())
        );
        assert_eq!(ActionName::RunShell.as_str(), "run_shell");
    }

    #[test]
    fn test_shell_command_requires_args() {
        assert_eq!(ActionRequest::run_shell("ls").shell_command(), Some("ls"));
        assert!(!ActionRequest::new("run_shell", None).is_runnable());
        assert!(!ActionRequest::new("run_shell", Some("  ".to_string())).is_runnable());
        assert!(!ActionRequest::new("write_file", Some("data".to_string())).is_runnable());
    }

    #[test]
    fn test_result_json() {
        let json = ActionResult::blocked("Guardrail blocked command: no").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "blocked");
        assert_eq!(value["output"], "Guardrail blocked command: no");

        let parsed: ActionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, ActionStatus::Blocked);
    }
}
