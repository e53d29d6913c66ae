//! OpenAI-compatible `/chat/completions` backend.

use async_trait::async_trait;
use std::time::Duration;

use super::{sse_text_stream, ChatBackend, ChatRequest, CompletionError, TextStream};
use crate::config::CompletionConfig;

/// Error bodies longer than this are truncated in error messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Talks to `POST {api_base}/chat/completions` with bearer auth.
pub struct OpenAiBackend {
    api_base: String,
    api_key: String,
    client: reqwest::Client,
    stream_idle_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            client,
            stream_idle_timeout: Duration::from_secs(30),
        })
    }

    /// Reads the API key from the environment variable named by
    /// `api_key_env`.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            CompletionError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        Ok(Self::new(config.api_base.clone(), api_key)?
            .with_stream_idle_timeout(config.stream_idle_timeout()))
    }

    /// Longest gap tolerated between streamed chunks. `Duration::ZERO`
    /// disables the check.
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, CompletionError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(CompletionError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError> {
        let response = self.send(request).await?;
        let json: serde_json::Value = response.json().await?;
        parse_completion_response(&json)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TextStream, CompletionError> {
        let response = self.send(request).await?;
        Ok(sse_text_stream(
            Box::pin(response.bytes_stream()),
            self.stream_idle_timeout,
        ))
    }
}

/// Extracts `choices[0].message.content` from a non-streamed response.
fn parse_completion_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(CompletionError::Protocol(message.to_string()));
    }

    json["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .and_then(|choice| choice["message"]["content"].as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CompletionError::Protocol("response has no choices[0].message.content".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_content() {
        let json = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}}]
        });
        assert_eq!(parse_completion_response(&json).unwrap(), "Hello");
    }

    #[test]
    fn missing_choices_is_protocol_error() {
        let json = serde_json::json!({"choices": []});
        assert!(matches!(
            parse_completion_response(&json),
            Err(CompletionError::Protocol(_))
        ));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let backend = OpenAiBackend::new("http://localhost:9/v1/", "k").unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:9/v1/chat/completions");
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = CompletionConfig {
            api_key_env: "IR_COPILOT_TEST_UNSET_KEY_VAR".to_string(),
            ..CompletionConfig::default()
        };
        assert!(matches!(
            OpenAiBackend::from_config(&config),
            Err(CompletionError::Config(_))
        ));
    }
}
