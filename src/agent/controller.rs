//! Agent Controller - the loop between the model and the shell
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!     AwaitingModel ──reply has TOOL_CALL──► ExecutingAction ┘
//!            │                                (assistant + tool_output appended)
//!            │ plain reply / unknown action
//!            ▼
//!         Terminal
//! ```
//!
//! Every turn is bounded by `max_steps` model calls and a wall-clock `time_budget`.

use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::conversation::{ConversationMessage, Role};
use crate::metrics::{AGENT_STEPS, AGENT_TURNS, LLM_CALL_DURATION};
use crate::shell::{CommandRunner, PersistentShell};
use crate::tools::{ActionRequest, ToolExecutor};
use crate::transport::{ModelTransport, TransportError};

/// Instructions inserted at the top of a transcript that has none
pub const DEFAULT_AGENT_SYSTEM_PROMPT: &str = r#"You are an AI assistant that can talk with the user and run bash commands on their machine.

To run a command, reply with exactly one line in this format:
TOOL_CALL: {"name": "run_shell", "args": "your command here"}
For example: TOOL_CALL: {"name": "run_shell", "args": "ls -l"}

Use run_shell to:
1. Read files (cat, head, tail)
2. Search for content (grep, find)
3. Create or modify files (echo "content" > file, sed -i)
4. Run scripts or programs (python3 script.py, node script.js)
5. Navigate the file system (cd, ls)

The shell is persistent: the working directory and environment variables carry over
between commands.

Safety guardrails:
Some dangerous commands are blocked. A blocked command comes back with a
"Guardrail blocked command" message; choose a safer alternative instead of retrying it.

After a command runs you will receive its output. When you do not need to run a
command, answer in plain text."#;

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of model calls per turn
    pub max_steps: usize,
    /// Wall-clock budget for one turn
    pub time_budget: Duration,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Extra attempts after a retryable transport failure
    pub transport_retries: u32,
    /// Delay between transport attempts
    pub transport_retry_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            time_budget: Duration::from_secs(600),
            system_prompt: None,
            transport_retries: 2,
            transport_retry_delay: Duration::from_millis(500),
        }
    }
}

impl AgentConfig {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_AGENT_SYSTEM_PROMPT)
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered in plain text
    Answered,
    /// The model asked for an action that does not exist or lacks arguments
    UnknownAction,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Answered => "answered",
            TurnOutcome::UnknownAction => "unknown_action",
        }
    }
}

/// Result of an agent turn
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Text to show the user
    pub final_response: String,
    pub outcome: TurnOutcome,
    /// Number of model calls made
    pub steps: usize,
    /// Number of actions executed
    pub actions_executed: usize,
    /// Unique trace ID for this turn
    pub trace_id: String,
}

/// Error type for agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Step limit of {steps} model calls reached without an answer")]
    StepLimitReached { steps: usize },
    #[error("Time budget exceeded after {elapsed:?}")]
    TimeBudgetExceeded { elapsed: Duration },
    #[error("Model transport error: {0}")]
    Transport(#[from] TransportError),
}

impl AgentError {
    fn outcome_label(&self) -> &'static str {
        match self {
            AgentError::StepLimitReached { .. } => "step_limit",
            AgentError::TimeBudgetExceeded { .. } => "time_budget",
            AgentError::Transport(_) => "transport_error",
        }
    }
}

enum LoopState {
    AwaitingModel,
    ExecutingAction {
        reply: String,
        request: ActionRequest,
    },
    Terminal {
        response: String,
        outcome: TurnOutcome,
    },
}

/// Agent Controller driving one conversation
pub struct AgentController<R: CommandRunner = PersistentShell> {
    transport: Box<dyn ModelTransport>,
    executor: ToolExecutor<R>,
    config: AgentConfig,
}

impl<R: CommandRunner> AgentController<R> {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `transport` - Model provider
    /// * `executor` - Owns the shell the model's commands run in
    /// * `config` - Loop bounds and prompt
    pub fn new(
        transport: Box<dyn ModelTransport>,
        executor: ToolExecutor<R>,
        config: AgentConfig,
    ) -> Self {
        Self {
            transport,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn ModelTransport {
        self.transport.as_ref()
    }

    /// Switch provider; the shell and its state are kept
    pub fn set_transport(&mut self, transport: Box<dyn ModelTransport>) {
        info!(from = %self.transport.name(), to = %transport.name(), "Switching model transport");
        self.transport = transport;
    }

    pub fn executor(&self) -> &ToolExecutor<R> {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut ToolExecutor<R> {
        &mut self.executor
    }

    /// Close the shell; safe to call more than once
    pub async fn close(&mut self) {
        self.executor.close().await;
    }

    /// Run one turn over `messages`
    ///
    /// The transcript is extended in place: a system prompt if missing, then one
    /// `assistant` + `tool_output` pair per executed action. The final answer is
    /// returned, not appended.
    ///
    /// # Errors
    /// Step limit, time budget, or a transport failure that survived all retries.
    pub async fn run(
        &mut self,
        messages: &mut Vec<ConversationMessage>,
        model: Option<&str>,
    ) -> Result<AgentResult, AgentError> {
        let trace_id = Uuid::now_v7().to_string();
        let root_span = info_span!(
            "agent_turn",
            trace_id = %trace_id,
            provider = %self.transport.name(),
            model = %model.unwrap_or(self.transport.default_model()),
            otel.name = "agent_turn"
        );

        let result = self
            .run_turn(messages, model, trace_id)
            .instrument(root_span)
            .await;

        match &result {
            Ok(r) => {
                AGENT_TURNS.with_label_values(&[r.outcome.as_str()]).inc();
                AGENT_STEPS.observe(r.steps as f64);
            }
            Err(e) => {
                warn!(error = %e, "Agent turn failed");
                AGENT_TURNS.with_label_values(&[e.outcome_label()]).inc();
            }
        }
        result
    }

    async fn run_turn(
        &mut self,
        messages: &mut Vec<ConversationMessage>,
        model: Option<&str>,
        trace_id: String,
    ) -> Result<AgentResult, AgentError> {
        self.ensure_system_prompt(messages);

        let started = Instant::now();
        let mut steps = 0;
        let mut actions_executed = 0;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if steps >= self.config.max_steps {
                        warn!(steps, "Step limit reached");
                        return Err(AgentError::StepLimitReached { steps });
                    }
                    let elapsed = started.elapsed();
                    if elapsed >= self.config.time_budget {
                        warn!(elapsed_ms = elapsed.as_millis() as u64, "Time budget exceeded");
                        return Err(AgentError::TimeBudgetExceeded { elapsed });
                    }

                    steps += 1;
                    let reply = self.call_model(messages, model, steps).await?;

                    match self.executor.parse(&reply) {
                        None => LoopState::Terminal {
                            response: reply,
                            outcome: TurnOutcome::Answered,
                        },
                        Some(request) if request.is_runnable() => {
                            LoopState::ExecutingAction { reply, request }
                        }
                        Some(request) => {
                            warn!(action = %request.name, "Model requested an unknown action");
                            LoopState::Terminal {
                                response: format!(
                                    "Error: Unknown tool or missing arguments: {}",
                                    request.name
                                ),
                                outcome: TurnOutcome::UnknownAction,
                            }
                        }
                    }
                }

                LoopState::ExecutingAction { reply, request } => {
                    // Keep the raw reply so the transcript shows exactly what was asked
                    messages.push(ConversationMessage::assistant(reply));
                    let result = self.executor.execute(&request).await;
                    actions_executed += 1;
                    info!(step = steps, status = result.status.as_str(), "Action executed");
                    messages.push(ConversationMessage::tool_output(result.to_json()));
                    LoopState::AwaitingModel
                }

                LoopState::Terminal { response, outcome } => {
                    info!(
                        outcome = outcome.as_str(),
                        steps,
                        actions = actions_executed,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Agent turn completed"
                    );
                    return Ok(AgentResult {
                        final_response: response,
                        outcome,
                        steps,
                        actions_executed,
                        trace_id,
                    });
                }
            };
        }
    }

    /// Insert the system prompt unless the transcript already starts with one
    fn ensure_system_prompt(&self, messages: &mut Vec<ConversationMessage>) {
        let has_system = messages
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false);
        if !has_system {
            messages.insert(0, ConversationMessage::system(self.config.system_prompt()));
        }
    }

    /// One model call, retried on transient failures
    async fn call_model(
        &self,
        messages: &[ConversationMessage],
        model: Option<&str>,
        step: usize,
    ) -> Result<String, TransportError> {
        let model_label = model.unwrap_or("default");
        let mut attempt: u32 = 0;

        loop {
            let llm_span = info_span!(
                "llm_call",
                step,
                attempt,
                model = %model_label,
                otel.name = "llm_call"
            );

            let call_start = Instant::now();
            let result = self
                .transport
                .generate(messages, model)
                .instrument(llm_span)
                .await;
            LLM_CALL_DURATION
                .with_label_values(&[model_label])
                .observe(call_start.elapsed().as_secs_f64());

            match result {
                Ok(reply) => {
                    debug!(step, chars = reply.len(), "Model replied");
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() && attempt < self.config.transport_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Model call failed, retrying");
                    tokio::time::sleep(self.config.transport_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::security::SafetyGuardrail;
    use crate::shell::{ShellError, ShellOutput};

    /// Replies from a fixed script and records every transcript it was sent
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<String, TransportError>>>,
        seen: Mutex<Vec<Vec<ConversationMessage>>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<String, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "script-1"
        }

        async fn generate(
            &self,
            messages: &[ConversationMessage],
            _model: Option<&str>,
        ) -> Result<String, TransportError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("out of script".to_string()))
        }
    }

    /// Answers `ls` with two file names, echoes anything else
    #[derive(Default)]
    struct FakeShell {
        commands: Vec<String>,
    }

    #[async_trait]
    impl CommandRunner for FakeShell {
        async fn run(&mut self, command: &str, _timeout: Duration) -> Result<ShellOutput, ShellError> {
            self.commands.push(command.to_string());
            let output = if command == "ls" {
                "a.txt\nb.txt".to_string()
            } else {
                format!("ran {}", command)
            };
            Ok(ShellOutput {
                output,
                timed_out: false,
                exited: false,
                duration: Duration::from_millis(1),
            })
        }

        fn is_alive(&mut self) -> bool {
            true
        }

        async fn restart(&mut self) -> Result<(), ShellError> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn controller(
        replies: Vec<Result<String, TransportError>>,
        config: AgentConfig,
    ) -> AgentController<FakeShell> {
        let executor = ToolExecutor::new(Box::new(SafetyGuardrail::new()), FakeShell::default());
        AgentController::new(Box::new(ScriptedTransport::new(replies)), executor, config)
    }

    fn fast_config() -> AgentConfig {
        AgentConfig {
            transport_retry_delay: Duration::from_millis(1),
            ..AgentConfig::default()
        }
    }

    fn tool_call(command: &str) -> Result<String, TransportError> {
        Ok(format!(
            r#"TOOL_CALL: {{"name": "run_shell", "args": "{}"}}"#,
            command
        ))
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.max_steps, 25);
        assert_eq!(config.time_budget, Duration::from_secs(600));
        assert_eq!(config.transport_retries, 2);
        assert_eq!(config.system_prompt(), DEFAULT_AGENT_SYSTEM_PROMPT);
        assert!(DEFAULT_AGENT_SYSTEM_PROMPT.contains("TOOL_CALL:"));
    }

    #[tokio::test]
    async fn test_plain_answer_ends_turn() {
        let mut agent = controller(vec![Ok("Hello!".to_string())], fast_config());
        let mut messages = vec![ConversationMessage::user("hi")];

        let result = agent.run(&mut messages, None).await.unwrap();
        assert_eq!(result.final_response, "Hello!");
        assert_eq!(result.outcome, TurnOutcome::Answered);
        assert_eq!(result.steps, 1);
        assert_eq!(result.actions_executed, 0);
        assert!(!result.trace_id.is_empty());

        // system prompt inserted, answer not appended
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, DEFAULT_AGENT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_existing_system_message_kept() {
        let mut agent = controller(vec![Ok("ok".to_string())], fast_config());
        let mut messages = vec![
            ConversationMessage::system("custom"),
            ConversationMessage::user("hi"),
        ];
        agent.run(&mut messages, None).await.unwrap();
        agent.run(&mut messages, None).await.unwrap();

        let system_count = messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
        assert_eq!(messages[0].content, "custom");
    }

    #[tokio::test]
    async fn test_action_then_answer() {
        let mut agent = controller(
            vec![tool_call("ls"), Ok("Found 2 files.".to_string())],
            fast_config(),
        );
        let mut messages = vec![ConversationMessage::user("list files")];

        let result = agent.run(&mut messages, None).await.unwrap();
        assert_eq!(result.final_response, "Found 2 files.");
        assert_eq!(result.steps, 2);
        assert_eq!(result.actions_executed, 1);

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::ToolOutput]
        );
        assert!(messages[2].content.starts_with("TOOL_CALL:"));
        let tool: serde_json::Value = serde_json::from_str(&messages[3].content).unwrap();
        assert_eq!(tool["status"], "succeeded");
        assert_eq!(tool["output"], "a.txt\nb.txt");
        assert_eq!(agent.executor().runner().commands, vec!["ls"]);
    }

    #[tokio::test]
    async fn test_blocked_action_continues() {
        let mut agent = controller(
            vec![tool_call("rm -rf /"), Ok("I won't do that.".to_string())],
            fast_config(),
        );
        let mut messages = vec![ConversationMessage::user("wipe the disk")];

        let result = agent.run(&mut messages, None).await.unwrap();
        assert_eq!(result.final_response, "I won't do that.");
        assert_eq!(result.actions_executed, 1);

        let tool: serde_json::Value = serde_json::from_str(&messages[3].content).unwrap();
        assert_eq!(tool["status"], "blocked");
        assert!(tool["output"].as_str().unwrap().contains("Guardrail blocked command"));
        assert!(agent.executor().runner().commands.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_terminates() {
        let mut agent = controller(
            vec![Ok(r#"TOOL_CALL: {"name": "write_file", "args": "x"}"#.to_string())],
            fast_config(),
        );
        let mut messages = vec![ConversationMessage::user("save it")];

        let result = agent.run(&mut messages, None).await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::UnknownAction);
        assert_eq!(
            result.final_response,
            "Error: Unknown tool or missing arguments: write_file"
        );
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.role != Role::ToolOutput));
    }

    #[tokio::test]
    async fn test_missing_args_terminates() {
        let mut agent = controller(
            vec![Ok(r#"TOOL_CALL: {"name": "run_shell"}"#.to_string())],
            fast_config(),
        );
        let mut messages = vec![ConversationMessage::user("do it")];
        let result = agent.run(&mut messages, None).await.unwrap();
        assert_eq!(result.outcome, TurnOutcome::UnknownAction);
        assert!(result.final_response.ends_with("run_shell"));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let replies = (0..10).map(|_| tool_call("pwd")).collect();
        let config = AgentConfig {
            max_steps: 3,
            ..fast_config()
        };
        let mut agent = controller(replies, config);
        let mut messages = vec![ConversationMessage::user("loop forever")];

        let err = agent.run(&mut messages, None).await.unwrap_err();
        assert!(matches!(err, AgentError::StepLimitReached { steps: 3 }));
        // everything appended before the limit is kept
        assert_eq!(
            messages.iter().filter(|m| m.role == Role::ToolOutput).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_time_budget() {
        let config = AgentConfig {
            time_budget: Duration::ZERO,
            ..fast_config()
        };
        let mut agent = controller(vec![Ok("never".to_string())], config);
        let mut messages = vec![ConversationMessage::user("hi")];

        let err = agent.run(&mut messages, None).await.unwrap_err();
        assert!(matches!(err, AgentError::TimeBudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn test_transient_transport_error_is_retried() {
        let mut agent = controller(
            vec![
                Err(TransportError::Api {
                    status: 503,
                    body: "busy".into(),
                }),
                Ok("recovered".to_string()),
            ],
            fast_config(),
        );
        let mut messages = vec![ConversationMessage::user("hi")];
        let result = agent.run(&mut messages, None).await.unwrap();
        assert_eq!(result.final_response, "recovered");
        assert_eq!(result.steps, 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_an_answer() {
        let busy = || {
            Err(TransportError::Api {
                status: 503,
                body: "busy".into(),
            })
        };
        let mut agent = controller(vec![busy(), busy(), busy(), Ok("late".into())], fast_config());
        let mut messages = vec![ConversationMessage::user("hi")];

        let err = agent.run(&mut messages, None).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Transport(TransportError::Api { status: 503, .. })
        ));
        assert!(messages.iter().all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut agent = controller(
            vec![
                Err(TransportError::Api {
                    status: 401,
                    body: "bad key".into(),
                }),
                Ok("unreachable".to_string()),
            ],
            fast_config(),
        );
        let mut messages = vec![ConversationMessage::user("hi")];
        let err = agent.run(&mut messages, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
    }
}
