//! Provider registry
//!
//! Every supported provider maps to one of three wire formats plus a base URL,
//! the environment variables holding its credentials, and a default model.
//! Adding a provider means adding a row to [`PROVIDERS`].

use tracing::{info, warn};

use super::anthropic::AnthropicTransport;
use super::ollama::{OllamaTransport, DEFAULT_OLLAMA_URL};
use super::openai::OpenAiTransport;
use super::ModelTransport;

/// Wire format spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    OpenAi,
    Anthropic,
    Ollama,
}

/// Static description of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: &'static str,
    pub api_format: ApiFormat,
    pub base_url: &'static str,
    /// Env var holding the API key (None for keyless providers)
    pub api_key_env: Option<&'static str>,
    /// Env var holding a bearer auth token (Anthropic-format gateways)
    pub auth_token_env: Option<&'static str>,
    pub default_model: &'static str,
}

pub const PROVIDERS: &[ProviderConfig] = &[
    // ─────────────────────────────────────────────────────────────────────
    // OpenAI-compatible
    // ─────────────────────────────────────────────────────────────────────
    ProviderConfig {
        name: "openai",
        api_format: ApiFormat::OpenAi,
        base_url: "https://api.openai.com/v1",
        api_key_env: Some("OPENAI_API_KEY"),
        auth_token_env: None,
        default_model: "gpt-4o-mini",
    },
    ProviderConfig {
        name: "deepseek",
        api_format: ApiFormat::OpenAi,
        base_url: "https://api.deepseek.com",
        api_key_env: Some("DEEPSEEK_API_KEY"),
        auth_token_env: None,
        default_model: "deepseek-chat",
    },
    ProviderConfig {
        name: "openrouter",
        api_format: ApiFormat::OpenAi,
        base_url: "https://openrouter.ai/api/v1",
        api_key_env: Some("OPENROUTER_API_KEY"),
        auth_token_env: None,
        default_model: "openai/gpt-4o-mini",
    },
    ProviderConfig {
        name: "anyrouter",
        api_format: ApiFormat::OpenAi,
        base_url: "https://anyrouter.com/v1",
        api_key_env: Some("ANYROUTER_API_KEY"),
        auth_token_env: None,
        default_model: "gpt-4o-mini",
    },
    ProviderConfig {
        name: "gemini",
        api_format: ApiFormat::OpenAi,
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai/",
        api_key_env: Some("GEMINI_API_KEY"),
        auth_token_env: None,
        default_model: "gemini-2.5-flash",
    },
    // ─────────────────────────────────────────────────────────────────────
    // Anthropic-compatible
    // ─────────────────────────────────────────────────────────────────────
    ProviderConfig {
        name: "anthropic",
        api_format: ApiFormat::Anthropic,
        base_url: "https://api.anthropic.com",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        auth_token_env: None,
        default_model: "claude-sonnet-4-20250514",
    },
    ProviderConfig {
        name: "agentrouter",
        api_format: ApiFormat::Anthropic,
        base_url: "https://agentrouter.org/",
        api_key_env: Some("AGENTROUTER_API_KEY"),
        auth_token_env: Some("AGENTROUTER_AUTH_TOKEN"),
        default_model: "claude-sonnet-4-20250514",
    },
    // ─────────────────────────────────────────────────────────────────────
    // Local
    // ─────────────────────────────────────────────────────────────────────
    ProviderConfig {
        name: "ollama",
        api_format: ApiFormat::Ollama,
        base_url: DEFAULT_OLLAMA_URL,
        api_key_env: None,
        auth_token_env: None,
        default_model: "qwen3",
    },
];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unsupported provider: '{name}'. Available: {available}")]
    UnknownProvider { name: String, available: String },
}

/// Look up a provider by name (case-insensitive)
pub fn provider_config(name: &str) -> Result<&'static ProviderConfig, RegistryError> {
    let wanted = name.trim().to_lowercase();
    PROVIDERS
        .iter()
        .find(|p| p.name == wanted)
        .ok_or_else(|| RegistryError::UnknownProvider {
            name: wanted,
            available: list_providers().join(", "),
        })
}

pub fn default_model(name: &str) -> Result<&'static str, RegistryError> {
    provider_config(name).map(|p| p.default_model)
}

/// All provider names, sorted
pub fn list_providers() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = PROVIDERS.iter().map(|p| p.name).collect();
    names.sort_unstable();
    names
}

/// Build a transport for `name`
///
/// `api_key` overrides the provider's key variable; credentials are otherwise read
/// from the process environment.
pub fn build_transport(
    name: &str,
    api_key: Option<String>,
) -> Result<Box<dyn ModelTransport>, RegistryError> {
    build_transport_with_env(name, api_key, |var| std::env::var(var).ok())
}

fn build_transport_with_env(
    name: &str,
    api_key: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Box<dyn ModelTransport>, RegistryError> {
    let config = provider_config(name)?;
    let api_key = api_key
        .or_else(|| config.api_key_env.and_then(&env))
        .filter(|k| !k.is_empty());
    let auth_token = config
        .auth_token_env
        .and_then(&env)
        .filter(|t| !t.is_empty());

    if config.api_format != ApiFormat::Ollama && api_key.is_none() && auth_token.is_none() {
        warn!(
            provider = config.name,
            env = config.api_key_env.unwrap_or_default(),
            "No credentials found; requests will likely be rejected"
        );
    }

    info!(provider = config.name, model = config.default_model, "Building model transport");

    let transport: Box<dyn ModelTransport> = match config.api_format {
        ApiFormat::OpenAi => Box::new(OpenAiTransport::new(
            config.name,
            config.base_url,
            api_key,
            config.default_model,
        )),
        ApiFormat::Anthropic => Box::new(AnthropicTransport::new(
            config.name,
            config.base_url,
            api_key,
            auth_token,
            config.default_model,
        )),
        ApiFormat::Ollama => Box::new(OllamaTransport::new(
            env("OLLAMA_HOST").unwrap_or_else(|| config.base_url.to_string()),
            config.default_model,
        )),
    };
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(provider_config("DeepSeek").unwrap().name, "deepseek");
        assert_eq!(default_model("anthropic").unwrap(), "claude-sonnet-4-20250514");
        assert_eq!(
            provider_config("agentrouter").unwrap().api_format,
            ApiFormat::Anthropic
        );
    }

    #[test]
    fn test_unknown_provider_lists_available() {
        let err = provider_config("nope").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'nope'"));
        assert!(msg.contains("anthropic, anyrouter"));
    }

    #[test]
    fn test_list_is_sorted_and_complete() {
        let names = list_providers();
        assert_eq!(names.len(), PROVIDERS.len());
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(names.contains(&"ollama"));
    }

    #[test]
    fn test_build_uses_provider_name_and_model() {
        let transport = build_transport_with_env("gemini", None, |var| {
            (var == "GEMINI_API_KEY").then(|| "g-key".to_string())
        })
        .unwrap();
        assert_eq!(transport.name(), "gemini");
        assert_eq!(transport.default_model(), "gemini-2.5-flash");

        let transport = build_transport_with_env("Ollama", None, |_| None).unwrap();
        assert_eq!(transport.name(), "ollama");
    }

    #[test]
    fn test_build_unknown_provider() {
        assert!(build_transport_with_env("bogus", None, |_| None).is_err());
    }
}
