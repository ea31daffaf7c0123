//! Runtime settings read from the environment (and a `.env` file, if present)

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::AgentConfig;
use crate::shell::ShellConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Settings for the `clawmini` binary
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Provider used at startup (`DEFAULT_LLM_PROVIDER`)
    pub provider: String,
    /// Model override; None means the provider default (`DEFAULT_LLM_MODEL`)
    pub model: Option<String>,
    /// Working directory of the shell (`CLAWMINI_WORKDIR`)
    pub workdir: PathBuf,
    /// Where sessions are stored (`CLAWMINI_SESSION_DIR`)
    pub session_dir: PathBuf,
    pub command_timeout: Duration,
    pub max_steps: usize,
    pub time_budget: Duration,
    /// Interpreter to spawn (`CLAWMINI_SHELL`)
    pub shell_program: String,
    /// OTLP collector; no export when unset (`OTEL_EXPORTER_OTLP_ENDPOINT`)
    pub otlp_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            workdir: PathBuf::from("./workspace"),
            session_dir: PathBuf::from("./sessions"),
            command_timeout: Duration::from_secs(30),
            max_steps: 25,
            time_budget: Duration::from_secs(600),
            shell_program: "/bin/bash".to_string(),
            otlp_endpoint: None,
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            provider: get("DEFAULT_LLM_PROVIDER")
                .map(|p| p.to_lowercase())
                .unwrap_or(defaults.provider),
            model: get("DEFAULT_LLM_MODEL"),
            workdir: get("CLAWMINI_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workdir),
            session_dir: get("CLAWMINI_SESSION_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_dir),
            command_timeout: parse_secs(
                "CLAWMINI_COMMAND_TIMEOUT_SECS",
                get("CLAWMINI_COMMAND_TIMEOUT_SECS"),
                defaults.command_timeout,
            )?,
            max_steps: parse_count("CLAWMINI_MAX_STEPS", get("CLAWMINI_MAX_STEPS"), defaults.max_steps)?,
            time_budget: parse_secs(
                "CLAWMINI_TIME_BUDGET_SECS",
                get("CLAWMINI_TIME_BUDGET_SECS"),
                defaults.time_budget,
            )?,
            shell_program: get("CLAWMINI_SHELL").unwrap_or(defaults.shell_program),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_steps: self.max_steps,
            time_budget: self.time_budget,
            ..AgentConfig::default()
        }
    }

    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            program: self.shell_program.clone(),
            ..ShellConfig::with_workdir(self.workdir.clone())
        }
    }
}

/// A count of at least one
fn parse_count(key: &'static str, raw: Option<String>, default: usize) -> Result<usize, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

/// Positive whole seconds
fn parse_secs(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.provider, "openai");
        assert_eq!(s.command_timeout, Duration::from_secs(30));
        assert!(s.otlp_endpoint.is_none());
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("DEFAULT_LLM_PROVIDER", "DeepSeek"),
            ("DEFAULT_LLM_MODEL", "deepseek-reasoner"),
            ("CLAWMINI_WORKDIR", "/tmp/ws"),
            ("CLAWMINI_COMMAND_TIMEOUT_SECS", "5"),
            ("CLAWMINI_MAX_STEPS", "7"),
            ("CLAWMINI_SHELL", "/usr/bin/bash"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
        ])
        .unwrap();
        assert_eq!(s.provider, "deepseek");
        assert_eq!(s.model.as_deref(), Some("deepseek-reasoner"));
        assert_eq!(s.workdir, PathBuf::from("/tmp/ws"));
        assert_eq!(s.command_timeout, Duration::from_secs(5));
        assert_eq!(s.agent_config().max_steps, 7);

        let shell = s.shell_config();
        assert_eq!(shell.program, "/usr/bin/bash");
        assert_eq!(shell.workdir, PathBuf::from("/tmp/ws"));
    }

    #[test]
    fn test_empty_value_is_unset() {
        let s = settings(&[("DEFAULT_LLM_MODEL", "  ")]).unwrap();
        assert!(s.model.is_none());
    }

    #[test]
    fn test_invalid_numbers() {
        let err = settings(&[("CLAWMINI_MAX_STEPS", "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "CLAWMINI_MAX_STEPS", ref value } if value == "many"
        ));
        assert!(settings(&[("CLAWMINI_TIME_BUDGET_SECS", "0")]).is_err());

        let err = settings(&[("CLAWMINI_MAX_STEPS", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "CLAWMINI_MAX_STEPS", ref value } if value == "0"
        ));
    }
}
