//! Tool executor - policy check plus persistent shell behind one `execute` call

use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};

use super::action::{ActionName, ActionRequest, ActionResult};
use super::parse::parse_action_request;
use crate::metrics::{SHELL_RESPAWNS, TOOL_CALLS};
use crate::security::CommandPolicy;
use crate::shell::{CommandRunner, PersistentShell, ShellConfig, ShellError};

/// Timeout applied to every shell action
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs model-requested actions
///
/// Owns exactly one command runner. A runner that died (timeout, `exit`) is replaced
/// before the next command, so a timeout costs the shell state but not the executor.
pub struct ToolExecutor<R: CommandRunner = PersistentShell> {
    policy: Box<dyn CommandPolicy>,
    runner: R,
    command_timeout: Duration,
}

impl ToolExecutor<PersistentShell> {
    /// Create an executor backed by a freshly spawned persistent shell
    ///
    /// # Errors
    /// Fails when the interpreter cannot be started.
    pub fn spawn(policy: impl CommandPolicy + 'static, shell: ShellConfig) -> Result<Self, ShellError> {
        let runner = PersistentShell::spawn(shell)?;
        Ok(Self::new(Box::new(policy), runner))
    }
}

impl<R: CommandRunner> ToolExecutor<R> {
    pub fn new(policy: Box<dyn CommandPolicy>, runner: R) -> Self {
        Self {
            policy,
            runner,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    /// Extract an action request from model text (None for plain answers)
    pub fn parse(&self, model_text: &str) -> Option<ActionRequest> {
        parse_action_request(model_text)
    }

    /// Perform one action
    ///
    /// Unknown names and missing arguments are reported without touching the policy or
    /// the shell. Denied commands never reach the shell.
    pub async fn execute(&mut self, request: &ActionRequest) -> ActionResult {
        let result = match (&request.name, request.shell_command()) {
            (ActionName::RunShell, Some(command)) => {
                let span = info_span!("run_shell", command_len = command.len());
                self.run_shell(command).instrument(span).await
            }
            (ActionName::RunShell, None) => {
                ActionResult::unknown_action(format!("Missing arguments for tool: {}", request.name))
            }
            (ActionName::Other(name), _) => {
                ActionResult::unknown_action(format!("Unknown tool: {}", name))
            }
        };

        TOOL_CALLS.with_label_values(&[result.status.as_str()]).inc();
        result
    }

    /// Release the shell; safe to call more than once
    pub async fn close(&mut self) {
        self.runner.close().await;
    }

    async fn run_shell(&mut self, command: &str) -> ActionResult {
        let verdict = self.policy.evaluate(command);
        if !verdict.allowed {
            return ActionResult::blocked(format!("Guardrail blocked command: {}", verdict.reason));
        }

        if !self.runner.is_alive() {
            warn!("Shell is no longer running, starting a new one");
            if let Err(e) = self.runner.restart().await {
                return ActionResult::failed(format!("Failed to restart shell: {}", e));
            }
            SHELL_RESPAWNS.inc();
        }

        info!(command = %command, "Executing shell command");
        match self.runner.run(command, self.command_timeout).await {
            Ok(out) => {
                if out.timed_out {
                    warn!(command = %command, "Shell command timed out; the shell will be restarted");
                }
                ActionResult::succeeded(out.output)
            }
            Err(e) => {
                warn!(error = %e, "Shell command failed");
                ActionResult::failed(format!("Shell error: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SafetyGuardrail;
    use crate::shell::{ShellOutput, ShellState};
    use crate::tools::action::ActionStatus;
    use async_trait::async_trait;

    /// Records commands instead of running them
    #[derive(Default)]
    struct RecordingRunner {
        commands: Vec<String>,
        alive: bool,
        restarts: usize,
        closes: usize,
    }

    impl RecordingRunner {
        fn alive() -> Self {
            Self {
                alive: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&mut self, command: &str, _timeout: Duration) -> Result<ShellOutput, ShellError> {
            if !self.alive {
                return Err(ShellError::NotRunning(ShellState::Exited));
            }
            self.commands.push(command.to_string());
            Ok(ShellOutput {
                output: format!("ran: {}", command),
                timed_out: false,
                exited: false,
                duration: Duration::from_millis(1),
            })
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        async fn restart(&mut self) -> Result<(), ShellError> {
            self.restarts += 1;
            self.alive = true;
            Ok(())
        }

        async fn close(&mut self) {
            self.closes += 1;
            self.alive = false;
        }
    }

    fn executor() -> ToolExecutor<RecordingRunner> {
        ToolExecutor::new(Box::new(SafetyGuardrail::new()), RecordingRunner::alive())
    }

    #[tokio::test]
    async fn test_safe_command_runs() {
        let mut exec = executor();
        let result = exec.execute(&ActionRequest::run_shell("ls")).await;
        assert_eq!(result.status, ActionStatus::Succeeded);
        assert_eq!(result.output, "ran: ls");
        assert_eq!(exec.runner().commands, vec!["ls"]);
    }

    #[tokio::test]
    async fn test_denied_command_never_reaches_shell() {
        let mut exec = executor();
        let result = exec.execute(&ActionRequest::run_shell("rm -rf /")).await;
        assert_eq!(result.status, ActionStatus::Blocked);
        assert!(result.output.contains("Guardrail blocked command"));
        assert!(result.output.contains("rm"));
        assert!(exec.runner().commands.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let mut exec = executor();
        let request = ActionRequest::new("write_file", Some("data".to_string()));
        let result = exec.execute(&request).await;
        assert_eq!(result.status, ActionStatus::UnknownAction);
        assert!(result.output.contains("Unknown tool: write_file"));
        assert!(exec.runner().commands.is_empty());
    }

    #[tokio::test]
    async fn test_missing_arguments() {
        let mut exec = executor();
        let result = exec.execute(&ActionRequest::new("run_shell", None)).await;
        assert_eq!(result.status, ActionStatus::UnknownAction);
        assert!(result.output.contains("Missing arguments"));
        assert!(exec.runner().commands.is_empty());
    }

    #[tokio::test]
    async fn test_dead_runner_is_restarted() {
        let mut exec = executor();
        exec.runner_mut().alive = false;

        let result = exec.execute(&ActionRequest::run_shell("pwd")).await;
        assert_eq!(result.status, ActionStatus::Succeeded);
        assert_eq!(exec.runner().restarts, 1);
        assert_eq!(exec.runner().commands, vec!["pwd"]);
    }

    #[tokio::test]
    async fn test_close_reaches_runner() {
        let mut exec = executor();
        exec.close().await;
        exec.close().await;
        assert_eq!(exec.runner().closes, 2);
    }

    #[test]
    fn test_parse_delegates() {
        let exec = executor();
        assert!(exec.parse("no action here").is_none());
        let request = exec
            .parse(r#"TOOL_CALL: {"name": "run_shell", "args": "ls"}"#)
            .unwrap();
        assert_eq!(request.shell_command(), Some("ls"));
    }
}
