//! OpenAI-compatible `/chat/completions` transport
//!
//! Used for OpenAI itself and every provider that mirrors its API
//! (DeepSeek, OpenRouter, Gemini's compatibility endpoint, ...).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{normalize_messages, read_body, ModelTransport, SystemPlacement, TransportError};
use crate::conversation::ConversationMessage;

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Transport for any OpenAI-compatible endpoint
#[derive(Clone)]
pub struct OpenAiTransport {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiTransport {
    /// Create a transport
    ///
    /// # Arguments
    /// * `provider` - Name reported in logs
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `api_key` - Sent as a bearer token when present
    /// * `default_model` - Model used when none is given per call
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ConversationMessage], model: &str) -> serde_json::Value {
        let (_, messages) = normalize_messages(messages, SystemPlacement::Inline);
        serde_json::json!({
            "model": model,
            "messages": messages,
        })
    }
}

#[async_trait]
impl ModelTransport for OpenAiTransport {
    fn name(&self) -> &str {
        &self.provider
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(
        &self,
        messages: &[ConversationMessage],
        model: Option<&str>,
    ) -> Result<String, TransportError> {
        let model = model.unwrap_or(&self.default_model);
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut request = self
            .client
            .post(&endpoint)
            .json(&self.request_body(messages, model));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let text = read_body(&self.provider, request.send().await?).await?;
        let completion: CompletionResponse = serde_json::from_str(&text)?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::EmptyResponse(self.provider.clone()))?;

        debug!(provider = %self.provider, model = %model, chars = content.len(), "Completion received");
        Ok(content)
    }
}
