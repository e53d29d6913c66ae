//! Chat completion with randomized exponential backoff.
//!
//! [`CompletionClient`] sends an assembled message list to a [`ChatBackend`]
//! and returns a [`Completion`]: either the whole answer, a lazy stream of
//! text fragments, or a failure marker once every attempt is spent.
//!
//! # Retry Semantics
//!
//! | Situation | Behavior |
//! |-----------|----------|
//! | Any error before the answer (or the stream) is obtained | retried, up to `max_attempts` total |
//! | Attempt exceeds `request_timeout` | counted as a failed attempt |
//! | Error after streaming has begun | yielded as an `Err` item; the stream ends |
//! | All attempts failed | [`Completion::Failed`], never a panic or `Err` |
//!
//! Waits between attempts follow [`RetryPolicy::backoff`]: with the defaults,
//! five attempts and a 1 s multiplier capped at 40 s.
//!
//! The backend is a trait so the endpoint is swappable; the shipped
//! implementation is [`OpenAiBackend`] for any OpenAI-compatible
//! `/chat/completions` API.

mod openai;
mod sse;

pub use openai::OpenAiBackend;
pub use sse::{parse_sse_line, sse_text_stream, SseEvent};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::models::ChatMessage;
use crate::retry::RetryPolicy;

/// A single-pass stream of answer fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("{0}")]
    Config(String),
}

/// Returned in place of an answer once every attempt has failed.
#[derive(Debug, Error)]
#[error("no answer after {attempts} attempt(s): {last_error}")]
pub struct CompletionFailure {
    pub attempts: u32,
    pub last_error: CompletionError,
}

/// Outcome of [`CompletionClient::complete`].
pub enum Completion {
    Text(String),
    Stream(TextStream),
    Failed(CompletionFailure),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
            Completion::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

impl Completion {
    pub fn is_failed(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }

    /// Drains the completion into a single string.
    ///
    /// A stream that errors part-way returns the error; fragments received
    /// before it are discarded.
    pub async fn into_text(self) -> Result<String, CompletionError> {
        match self {
            Completion::Text(text) => Ok(text),
            Completion::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(fragment) = stream.next().await {
                    text.push_str(&fragment?);
                }
                Ok(text)
            }
            Completion::Failed(failure) => Err(failure.last_error),
        }
    }
}

/// Request body for an OpenAI-compatible chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A chat-completion endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Requests the full answer in one response.
    async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError>;

    /// Opens a streamed answer. Returns once the response has started.
    async fn stream(&self, request: &ChatRequest) -> Result<TextStream, CompletionError>;
}

/// Sends prompts to a [`ChatBackend`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct CompletionClient {
    backend: Arc<dyn ChatBackend>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl CompletionClient {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            policy: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Builds a client for the configured OpenAI-compatible endpoint.
    ///
    /// Fails if the API key environment variable is unset.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let backend = OpenAiBackend::from_config(config)?;
        let mut client = Self::new(Arc::new(backend), config.model.clone())
            .with_retry_policy(config.retry_policy())
            .with_request_timeout(config.request_timeout());
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-attempt limit. `Duration::ZERO` disables it.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Requests an answer for `messages`, retrying any failure.
    ///
    /// Never returns an error: exhaustion is reported as
    /// [`Completion::Failed`] so callers can show a fallback message.
    pub async fn complete(&self, messages: &[ChatMessage], stream: bool) -> Completion {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            stream,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut failed = 0u32;
        loop {
            let attempt = failed + 1;
            tracing::debug!(
                backend = self.backend.name(),
                model = %self.model,
                stream,
                attempt,
                messages = request.messages.len(),
                "requesting completion"
            );

            let err = match self.attempt(&request).await {
                Ok(completion) => return completion,
                Err(e) => e,
            };

            failed += 1;
            if !self.policy.should_retry(failed) {
                tracing::error!(attempts = failed, error = %err, "completion failed, giving up");
                return Completion::Failed(CompletionFailure {
                    attempts: failed,
                    last_error: err,
                });
            }

            let wait = self.policy.backoff(failed);
            tracing::warn!(
                attempt = failed,
                max_attempts = self.policy.max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "completion attempt failed, retrying"
            );
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    async fn attempt(&self, request: &ChatRequest) -> Result<Completion, CompletionError> {
        let call = async {
            if request.stream {
                self.backend.stream(request).await.map(Completion::Stream)
            } else {
                self.backend.complete(request).await.map(Completion::Text)
            }
        };

        if self.request_timeout.is_zero() {
            return call.await;
        }
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.request_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Fails a fixed number of times, then answers.
    struct Flaky {
        failures_left: Mutex<u32>,
        calls: Mutex<u32>,
        answer: &'static str,
    }

    impl Flaky {
        fn new(failures: u32, answer: &'static str) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                calls: Mutex::new(0),
                answer,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }

        fn tick(&self) -> Result<(), CompletionError> {
            *self.calls.lock().unwrap() += 1;
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(CompletionError::Status {
                    status: 503,
                    body: "overloaded".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChatBackend for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<String, CompletionError> {
            self.tick()?;
            Ok(self.answer.to_string())
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<TextStream, CompletionError> {
            self.tick()?;
            let parts: VecDeque<Result<String, CompletionError>> = self
                .answer
                .split_inclusive(' ')
                .map(|s| Ok(s.to_string()))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(parts)))
        }
    }

    fn client(backend: Arc<Flaky>) -> CompletionClient {
        CompletionClient::new(backend, "gpt-4o").with_retry_policy(RetryPolicy::immediate(5))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let backend = Arc::new(Flaky::new(4, "Revenue was $20.1B."));
        let completion = client(backend.clone())
            .complete(&[ChatMessage::user("q")], false)
            .await;
        assert_eq!(completion.into_text().await.unwrap(), "Revenue was $20.1B.");
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let backend = Arc::new(Flaky::new(5, "unused"));
        let completion = client(backend.clone())
            .complete(&[ChatMessage::user("q")], false)
            .await;
        match completion {
            Completion::Failed(failure) => {
                assert_eq!(failure.attempts, 5);
                assert!(matches!(
                    failure.last_error,
                    CompletionError::Status { status: 503, .. }
                ));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test]
    async fn streamed_text_matches_full_text() {
        let answer = "Gross margin was 32.1% in the quarter.";
        let streamed = client(Arc::new(Flaky::new(1, answer)))
            .complete(&[ChatMessage::user("q")], true)
            .await;
        assert!(matches!(streamed, Completion::Stream(_)));
        let whole = client(Arc::new(Flaky::new(0, answer)))
            .complete(&[ChatMessage::user("q")], false)
            .await;
        assert_eq!(
            streamed.into_text().await.unwrap(),
            whole.into_text().await.unwrap()
        );
    }

    struct Hanging;

    #[async_trait]
    impl ChatBackend for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<String, CompletionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<TextStream, CompletionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(CompletionError::Protocol("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn per_attempt_timeout_counts_as_failure() {
        let client = CompletionClient::new(Arc::new(Hanging), "gpt-4o")
            .with_retry_policy(RetryPolicy::immediate(2))
            .with_request_timeout(Duration::from_millis(20));
        match client.complete(&[ChatMessage::user("q")], false).await {
            Completion::Failed(failure) => {
                assert_eq!(failure.attempts, 2);
                assert!(matches!(failure.last_error, CompletionError::Timeout(_)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn request_omits_unset_options() {
        let request = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            stream: true,
            temperature: None,
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
    }
}
