//! Anthropic-compatible `/v1/messages` transport

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{normalize_messages, read_body, ModelTransport, SystemPlacement, TransportError};
use crate::conversation::ConversationMessage;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Transport for the Anthropic Messages API and gateways that proxy it
#[derive(Clone)]
pub struct AnthropicTransport {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    auth_token: Option<String>,
    default_model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicTransport {
    /// `api_key` goes in `x-api-key`, `auth_token` in a bearer header; gateways
    /// differ in which one they accept, so both are sent when present.
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        auth_token: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            auth_token,
            default_model: default_model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request_body(
        &self,
        messages: &[ConversationMessage],
        model: &str,
    ) -> Result<serde_json::Value, TransportError> {
        let (system, messages) = normalize_messages(messages, SystemPlacement::Separate);
        if messages.is_empty() {
            return Err(TransportError::EmptyConversation);
        }

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system);
        }
        Ok(body)
    }
}

#[async_trait]
impl ModelTransport for AnthropicTransport {
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
        let body = self.request_body(messages, model)?;
        let endpoint = format!("{}/v1/messages", self.base_url);

        let mut request = self
            .client
            .post(&endpoint)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let text = read_body(&self.provider, request.send().await?).await?;
        let reply: MessagesResponse = serde_json::from_str(&text)?;

        let content = reply
            .content
            .into_iter()
            .find(|block| block.block_type == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| TransportError::EmptyResponse(self.provider.clone()))?;

        debug!(provider = %self.provider, model = %model, chars = content.len(), "Message received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(base: &str) -> AnthropicTransport {
        AnthropicTransport::new(
            "anthropic",
            base,
            Some("key".to_string()),
            None,
            "claude-sonnet-4-5",
        )
    }

    #[test]
    fn test_system_lifted_out() {
        let body = transport("https://api.anthropic.com")
            .request_body(
                &[
                    ConversationMessage::system("a"),
                    ConversationMessage::system("b"),
                    ConversationMessage::user("hi"),
                ],
                "m",
            )
            .unwrap();
        assert_eq!(body["system"], "a\n\nb");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_only_system_is_empty_conversation() {
        let err = transport("https://api.anthropic.com")
            .request_body(&[ConversationMessage::system("a")], "m")
            .unwrap_err();
        assert!(matches!(err, TransportError::EmptyConversation));
    }

    #[tokio::test]
    async fn test_generate_returns_first_text_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({"system": "be brief"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "thinking", "thinking": "..."},
                    {"type": "text", "text": "done"}
                ]
            })))
            .mount(&server)
            .await;

        let reply = transport(&server.uri())
            .generate(
                &[
                    ConversationMessage::system("be brief"),
                    ConversationMessage::user("hi"),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, "done");
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = transport(&server.uri())
            .generate(&[ConversationMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Api { status: 529, .. }));
    }
}
