//! Command guardrail - deny-list filter for shell commands requested by the model
//!
//! The guardrail tokenizes a command line with shell-word rules and looks at the
//! executable (the first token) only:
//!
//! ```text
//! "ls -la | rm x"  ──shlex──►  ["ls", "-la", "|", "rm", "x"]
//!                                 │
//!                                 └─► "ls" not in deny-set ──► ALLOW
//!
//! "sudo reboot"    ──shlex──►  ["sudo", "reboot"]
//!                                 │
//!                                 └─► "sudo" in deny-set  ──► DENY
//!
//! "echo 'oops"     ──shlex──►  error (unbalanced quote)  ──► DENY
//! ```
//!
//! Pipelines, `;`/`&&` chains and `$(...)` substitutions are NOT inspected. A stricter
//! policy can be swapped in through [`CommandPolicy`] without touching the shell or the loop.

use std::collections::BTreeSet;

use tracing::warn;

use crate::metrics::GUARDRAIL_DENIALS;

/// Executables refused by the default guardrail.
///
/// Grouped by what they can do to the host: delete or move data, change ownership or
/// permissions, escalate privileges, format disks, power off, administer users and the
/// firewall, kill processes, and fetch from or send to the network.
pub const DEFAULT_DENIED_EXECUTABLES: &[&str] = &[
    // File removal / relocation
    "rm",
    "mv",
    "dd",
    "mkfs",
    // Ownership and permissions
    "chmod",
    "chown",
    // Privilege escalation
    "sudo",
    "visudo",
    // Power state
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    // User and group administration
    "passwd",
    "userdel",
    "groupdel",
    "usermod",
    "groupmod",
    "crontab",
    // Firewall
    "iptables",
    "ufw",
    // Process termination
    "kill",
    "pkill",
    "killall",
    // Network fetchers
    "wget",
    "curl",
];

/// Outcome of evaluating one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandVerdict {
    pub allowed: bool,
    pub reason: String,
}

impl CommandVerdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// A policy deciding whether a command may reach the shell.
pub trait CommandPolicy: Send + Sync {
    fn evaluate(&self, command: &str) -> CommandVerdict;
}

/// Deny-list guardrail over the first token of a command line.
#[derive(Debug, Clone)]
pub struct SafetyGuardrail {
    denied: BTreeSet<String>,
}

impl Default for SafetyGuardrail {
    fn default() -> Self {
        Self::with_denied(DEFAULT_DENIED_EXECUTABLES.iter().copied())
    }
}

impl SafetyGuardrail {
    /// Create a guardrail with the default deny-set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a guardrail with a custom deny-set
    pub fn with_denied<I, S>(executables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: executables.into_iter().map(Into::into).collect(),
        }
    }

    /// Add an executable to the deny-set
    pub fn block(&mut self, executable: &str) -> &mut Self {
        self.denied.insert(executable.to_string());
        self
    }

    /// Remove an executable from the deny-set
    pub fn allow(&mut self, executable: &str) -> &mut Self {
        self.denied.remove(executable);
        self
    }

    pub fn is_denied(&self, executable: &str) -> bool {
        self.denied.contains(executable)
    }

    /// Iterate the deny-set in sorted order
    pub fn denied(&self) -> impl Iterator<Item = &str> {
        self.denied.iter().map(String::as_str)
    }

    fn verdict(&self, command: &str) -> CommandVerdict {
        let Some(tokens) = shlex::split(command) else {
            return CommandVerdict::deny(
                "Error parsing command: unbalanced quotes or trailing escape",
            );
        };

        let Some(executable) = tokens.first() else {
            return CommandVerdict::allow("Command is empty.");
        };

        if self.denied.contains(executable) {
            return CommandVerdict::deny(format!(
                "Command '{}' is in the blocklist and is not allowed.",
                executable
            ));
        }

        // Still applies when a custom deny-set leaves `rm` out.
        if executable == "rm" && tokens.iter().any(|t| t == "-rf") {
            return CommandVerdict::deny("Command 'rm -rf' is explicitly blocked for safety.");
        }

        CommandVerdict::allow("Command is safe.")
    }
}

impl CommandPolicy for SafetyGuardrail {
    fn evaluate(&self, command: &str) -> CommandVerdict {
        let verdict = self.verdict(command);
        if !verdict.allowed {
            let executable = shlex::split(command)
                .and_then(|tokens| tokens.into_iter().next())
                .unwrap_or_else(|| "<unparsed>".to_string());
            warn!(executable = %executable, reason = %verdict.reason, "Guardrail denied command");
            GUARDRAIL_DENIALS.with_label_values(&[&executable]).inc();
        }
        verdict
    }
}
