//! Model transports - send a transcript to a provider, get text back
//!
//! ```text
//! AgentController ──generate(transcript, model)──► ModelTransport
//!                                                     ├─ OllamaTransport     (/api/chat)
//!                                                     ├─ OpenAiTransport     (/chat/completions)
//!                                                     └─ AnthropicTransport  (/v1/messages)
//! ```
//!
//! Failures come back as `Err(TransportError)`, never as answer text, so the loop can
//! tell "the model said X" apart from "the call failed".

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;

use crate::conversation::{ConversationMessage, Role};

pub use anthropic::AnthropicTransport;
pub use ollama::OllamaTransport;
pub use openai::OpenAiTransport;
pub use registry::{
    build_transport, default_model, list_providers, provider_config, ApiFormat, ProviderConfig,
    RegistryError, PROVIDERS,
};

/// Prefix given to tool results when a provider has no tool-output role
pub const TOOL_OUTPUT_PREFIX: &str = "[Tool Output]:\n";

/// Error type for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Empty response from {0}")]
    EmptyResponse(String),
    #[error("No user messages found")]
    EmptyConversation,
}

impl TransportError {
    /// Whether sending the same request again could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(_) | TransportError::EmptyResponse(_) => true,
            TransportError::Api { status, .. } => *status == 429 || *status >= 500,
            TransportError::Parse(_) | TransportError::EmptyConversation => false,
        }
    }
}

/// A model provider the agent loop can talk to
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Provider name for logs and prompts
    fn name(&self) -> &str;

    /// Model used when the caller passes none
    fn default_model(&self) -> &str;

    /// Send the whole transcript and return the reply text
    async fn generate(
        &self,
        messages: &[ConversationMessage],
        model: Option<&str>,
    ) -> Result<String, TransportError>;
}

/// A message in the shape every provider accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

/// Where system messages go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPlacement {
    /// Kept in the message list (OpenAI, Ollama)
    Inline,
    /// Lifted into a separate field (Anthropic)
    Separate,
}

/// Convert a transcript into provider messages
///
/// - `tool_output` becomes `user` with [`TOOL_OUTPUT_PREFIX`]
/// - consecutive non-system messages with the same role are merged with a newline
/// - with [`SystemPlacement::Separate`], system messages are joined by blank lines and
///   returned on their own
pub fn normalize_messages(
    messages: &[ConversationMessage],
    placement: SystemPlacement,
) -> (Option<String>, Vec<WireMessage>) {
    let mut system: Option<String> = None;
    let mut normalized: Vec<WireMessage> = Vec::with_capacity(messages.len());

    for msg in messages {
        let (role, content) = match msg.role {
            Role::System if placement == SystemPlacement::Separate => {
                match system.as_mut() {
                    Some(s) => {
                        s.push_str("\n\n");
                        s.push_str(&msg.content);
                    }
                    None => system = Some(msg.content.clone()),
                }
                continue;
            }
            Role::System => ("system", msg.content.clone()),
            Role::User => ("user", msg.content.clone()),
            Role::Assistant => ("assistant", msg.content.clone()),
            Role::ToolOutput => ("user", format!("{}{}", TOOL_OUTPUT_PREFIX, msg.content)),
        };

        match normalized.last_mut() {
            Some(last) if last.role == role && role != "system" => {
                last.content.push('\n');
                last.content.push_str(&content);
            }
            _ => normalized.push(WireMessage { role, content }),
        }
    }

    (system, normalized)
}

/// Turn a non-success HTTP response into an error, otherwise return its body
pub(crate) async fn read_body(
    provider: &str,
    response: reqwest::Response,
) -> Result<String, TransportError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(TransportError::Api {
            status: status.as_u16(),
            body: text,
        });
    }
    if text.trim().is_empty() {
        return Err(TransportError::EmptyResponse(provider.to_string()));
    }
    Ok(text)
}
