use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::Settings;
use crate::error::{Result, WebwiseError};
use crate::history::ChatMessage;

// Structures matching the /v1/chat/completions endpoint
#[derive(Serialize, Debug)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for the remote chat-completion API.
#[derive(Clone, Debug)]
pub struct CompletionClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = settings.openai_api_key()?.to_string();
        Ok(Self {
            http: Client::new(),
            endpoint: format!(
                "{}/v1/chat/completions",
                settings.openai_base_url.trim_end_matches('/')
            ),
            model: settings.model.clone(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends an ordered message list and returns the completion text.
    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    pub async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Completion API request failed");
            return Err(WebwiseError::Api {
                service: "completion",
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<CompletionResponse>().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        debug!(chars = content.len(), "Received completion");
        Ok(content)
    }

    /// The common "system instruction + one user message" shape.
    pub async fn ask(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        self.complete(&messages, max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_api_key() {
        let err = CompletionClient::new(&Settings::default()).unwrap_err();
        assert!(matches!(err, WebwiseError::Config(_)));
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let settings = Settings {
            openai_api_key: Some("sk-test".to_string()),
            openai_base_url: "http://localhost:9999/".to_string(),
            ..Settings::default()
        };
        let client = CompletionClient::new(&settings).unwrap();
        assert_eq!(client.endpoint, "http://localhost:9999/v1/chat/completions");
        assert_eq!(client.model(), "gpt-3.5-turbo");
    }

    #[test]
    fn test_request_wire_shape() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "gpt-3.5-turbo",
            messages: &messages,
            max_tokens: 2000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-3.5-turbo");
        assert_eq!(value["max_tokens"], 2000);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
    }
}
