//! Ollama `/api/chat` transport

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{normalize_messages, read_body, ModelTransport, SystemPlacement, TransportError};
use crate::conversation::ConversationMessage;

/// Default local Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Client for a local or remote Ollama server
#[derive(Clone)]
pub struct OllamaTransport {
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl OllamaTransport {
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ConversationMessage], model: &str) -> serde_json::Value {
        let (_, messages) = normalize_messages(messages, SystemPlacement::Inline);
        serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        })
    }
}

#[async_trait]
impl ModelTransport for OllamaTransport {
    fn name(&self) -> &str {
        "ollama"
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
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = self.request_body(messages, model);

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let text = read_body(self.name(), response).await?;

        let chat: ChatResponse = serde_json::from_str(&text)?;
        debug!(model = %model, eval_count = chat.eval_count, "Ollama reply received");
        Ok(chat.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_body_shape() {
        let transport = OllamaTransport::new("http://localhost:11434/", "qwen3");
        let body = transport.request_body(
            &[
                ConversationMessage::system("sys"),
                ConversationMessage::tool_output("out"),
            ],
            "llama3.2",
        );
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "[Tool Output]:\nout");
        assert_eq!(transport.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_generate_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "qwen3"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "hi there"},
                "done": true,
                "eval_count": 3
            })))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new(server.uri(), "qwen3");
        let reply = transport
            .generate(&[ConversationMessage::user("hello")], None)
            .await
            .unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn test_http_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let transport = OllamaTransport::new(server.uri(), "missing");
        let err = transport
            .generate(&[ConversationMessage::user("hello")], None)
            .await
            .unwrap_err();
        match err {
            TransportError::Api { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
