//! clawmini - interactive front end
//!
//! Reads lines from stdin. Plain text goes to the agent; lines starting with `/`
//! are commands. The shell is closed and the session saved on every way out:
//! `/exit`, end of input, Ctrl-C, and fatal errors.

use std::io::Write;
use std::ops::ControlFlow;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use clawmini::agent::{AgentController, Session, SessionStore};
use clawmini::config::Settings;
use clawmini::conversation::Role;
use clawmini::security::SafetyGuardrail;
use clawmini::tools::ToolExecutor;
use clawmini::transport::{build_transport, list_providers, provider_config, PROVIDERS};
use clawmini::{metrics, telemetry};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct Repl {
    agent: AgentController,
    store: SessionStore,
    session: Session,
    provider: String,
    model: String,
}

impl Repl {
    fn prompt(&self) -> String {
        format!("[{}/{}]", self.session.session_id, self.provider)
    }

    fn save(&mut self) {
        if let Err(e) = self.store.save(&mut self.session) {
            warn!(error = %e, "Failed to save session");
            println!("Warning: could not save session: {}", e);
        }
    }

    fn print_help(&self) {
        println!("\nAvailable commands:");
        println!("  /llm <provider> [model] - Change LLM provider and optionally model");
        println!("                            Providers: {}", list_providers().join(", "));
        println!("  /providers              - List all supported providers with their defaults");
        println!("  /session new [id]       - Create a new session (optionally with an ID)");
        println!("  /session load <id>      - Load an existing session");
        println!("  /session list           - List all available sessions");
        println!("  /session current        - Show current session ID");
        println!("  /metrics                - Show Prometheus metrics");
        println!("  /exit                   - Exit the application");
        println!("  /help                   - Show this help message");
        println!("\nType your message to the LLM or a command.");
    }

    fn print_providers(&self) {
        let rule = "-".repeat(72);
        println!("\n  Registered LLM Providers:");
        println!("  {}", rule);
        println!("  {:<15} {:<12} {:<30} Base URL", "Provider", "API Format", "Default Model");
        println!("  {}", rule);
        let mut providers: Vec<_> = PROVIDERS.iter().collect();
        providers.sort_by_key(|p| p.name);
        for p in providers {
            let marker = if p.name == self.provider { " ◀" } else { "" };
            println!(
                "  {:<15} {:<12} {:<30} {}{}",
                p.name,
                format!("{:?}", p.api_format).to_lowercase(),
                p.default_model,
                p.base_url,
                marker
            );
        }
        println!("  {}", rule);
    }

    fn switch_llm(&mut self, args: &[&str]) {
        let Some(name) = args.first() else {
            println!("Current LLM: {} ({})", self.provider, self.model);
            println!("Usage: /llm <provider> [model]");
            return;
        };

        let config = match provider_config(name) {
            Ok(c) => c,
            Err(e) => {
                println!("Error: {}", e);
                return;
            }
        };
        match build_transport(config.name, None) {
            Ok(transport) => {
                self.agent.set_transport(transport);
                self.provider = config.name.to_string();
                self.model = args
                    .get(1)
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| config.default_model.to_string());
                println!("LLM changed to: {} ({})", self.provider, self.model);
            }
            Err(e) => println!("Error: {}", e),
        }
    }

    fn session_command(&mut self, args: &[&str]) {
        match args {
            ["new", rest @ ..] => {
                self.save();
                match self.store.create(rest.first().copied()) {
                    Ok(session) => {
                        self.session = session;
                        println!("New session '{}' created.", self.session.session_id);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            ["load", id, ..] => {
                self.save();
                match self.store.load(id) {
                    Ok(session) => {
                        self.session = session;
                        println!("Session '{}' loaded.", self.session.session_id);
                    }
                    Err(e) => println!("Failed to load session '{}': {}", id, e),
                }
            }
            ["load"] => println!("Usage: /session load <id>"),
            ["list", ..] => match self.store.list() {
                Ok(ids) if ids.is_empty() => println!("No sessions found."),
                Ok(ids) => {
                    println!("Available sessions:");
                    for id in ids {
                        println!("  - {}", id);
                    }
                }
                Err(e) => println!("Error: {}", e),
            },
            ["current", ..] => println!("Current session: {}", self.session.session_id),
            [] => println!("Usage: /session [new|load|list|current]"),
            _ => println!("Unknown session subcommand. Usage: /session [new|load|list|current]"),
        }
    }

    fn handle_command(&mut self, line: &str) -> ControlFlow<()> {
        let parts: Vec<&str> = line[1..].split_whitespace().collect();
        let Some((command, args)) = parts.split_first() else {
            println!("Unknown command: {}", line);
            return ControlFlow::Continue(());
        };

        match *command {
            "exit" => return ControlFlow::Break(()),
            "help" => self.print_help(),
            "providers" => self.print_providers(),
            "llm" => self.switch_llm(args),
            "session" => self.session_command(args),
            "metrics" => print!("{}", metrics::render()),
            _ => println!("Unknown command: {}", line),
        }
        ControlFlow::Continue(())
    }

    /// One user message through the agent; Ctrl-C abandons the turn and exits
    async fn handle_message(&mut self, line: &str) -> ControlFlow<()> {
        self.session.append(Role::User, line);
        self.save();

        let model = self.model.clone();
        let result = tokio::select! {
            result = self.agent.run(self.session.history_mut(), Some(&model)) => result,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted.");
                return ControlFlow::Break(());
            }
        };

        match result {
            Ok(result) => {
                println!("\n{} LLM: {}", self.prompt(), result.final_response);
                self.session.append(Role::Assistant, result.final_response);
            }
            Err(e) => {
                error!(error = %e, "Turn failed");
                println!("\nError: {}", e);
            }
        }
        self.save();
        ControlFlow::Continue(())
    }

    async fn run(&mut self) -> Result<(), BoxError> {
        println!("Welcome to clawmini! Type /help for commands.");
        println!("Current LLM: {} ({})", self.provider, self.model);
        println!("Active session: {}", self.session.session_id);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("\n{} You: ", self.prompt());
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                println!();
                break;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let flow = if line.starts_with('/') {
                self.handle_command(line)
            } else {
                self.handle_message(line).await
            };
            if flow.is_break() {
                break;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.save();
        self.agent.close().await;
        info!(session_id = %self.session.session_id, "Shell closed, session saved");
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let settings = Settings::from_env()?;
    telemetry::init_tracing("clawmini", settings.otlp_endpoint.as_deref())?;

    let transport = build_transport(&settings.provider, None)?;
    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| transport.default_model().to_string());
    let provider = transport.name().to_string();

    let executor = ToolExecutor::spawn(SafetyGuardrail::new(), settings.shell_config())?
        .with_command_timeout(settings.command_timeout);
    let agent = AgentController::new(transport, executor, settings.agent_config());

    let store = SessionStore::new(&settings.session_dir)?;
    let session = match store.most_recent()? {
        Some(session) => {
            println!("Existing sessions found. Loading the most recent one.");
            session
        }
        None => {
            println!("No existing sessions. Creating a new one.");
            store.create(None)?
        }
    };

    let mut repl = Repl {
        agent,
        store,
        session,
        provider,
        model,
    };

    let outcome = repl.run().await;
    repl.shutdown().await;
    println!("Goodbye!");

    telemetry::shutdown_tracing();
    outcome
}
