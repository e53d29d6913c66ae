//! The question-answering pipeline.
//!
//! A [`Copilot`] owns a built index (through its [`Retriever`]), a
//! [`PromptAssembler`], and a [`CompletionClient`]. It is created once per
//! process by [`Copilot::from_config`] and then shared by reference (or
//! `Arc`) with whatever serves questions. The index is never rebuilt per
//! question.
//!
//! ```text
//! question + history
//!   → Retriever::retrieve        (top-k snippets)
//!   → PromptAssembler::assemble  ([system] + history + [user])
//!   → CompletionClient::complete (text | stream | failed)
//! ```
//!
//! [`Copilot::ask`] never fails: retrieval errors degrade to an empty
//! context and completion exhaustion is reported as
//! [`Completion::Failed`]. The caller records the exchange in its own
//! history once it has the full answer text.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::completion::{Completion, CompletionClient};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::index::VectorIndex;
use crate::loader::load_documents;
use crate::models::{ChatMessage, ScoredChunk};
use crate::progress::IndexProgress;
use crate::prompt::PromptAssembler;
use crate::retriever::Retriever;

/// Snippets retrieved for one question.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub chunks: Vec<ScoredChunk>,
    /// Set when retrieval failed and `chunks` is empty because of it.
    pub error: Option<String>,
}

impl RetrievedContext {
    /// The enumerated list embedded in the prompt.
    pub fn formatted(&self) -> String {
        PromptAssembler::format_context(&self.chunks)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Distinct source paths, in rank order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for chunk in &self.chunks {
            let path = chunk.chunk.source_path.display().to_string();
            if !sources.contains(&path) {
                sources.push(path);
            }
        }
        sources
    }
}

/// Result of [`Copilot::ask`].
#[derive(Debug)]
pub struct Answer {
    pub context: RetrievedContext,
    /// The exact messages sent to the completion model.
    pub prompt: Vec<ChatMessage>,
    pub completion: Completion,
}

pub struct Copilot {
    retriever: Retriever,
    prompt: PromptAssembler,
    completion: CompletionClient,
    stream: bool,
    greeting: String,
}

impl Copilot {
    pub fn new(retriever: Retriever, prompt: PromptAssembler, completion: CompletionClient) -> Self {
        let greeting = crate::config::AssistantConfig {
            company: prompt.company().to_string(),
            ..Default::default()
        }
        .greeting();
        Self {
            retriever,
            prompt,
            completion,
            stream: true,
            greeting,
        }
    }

    /// Whether [`Copilot::ask`] requests a streamed answer.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Builds the completion client, then the index.
    ///
    /// The API key is checked first so a missing credential fails before
    /// the (slow) index build.
    pub async fn from_config(config: &Config, progress: &dyn IndexProgress) -> Result<Self> {
        let completion = CompletionClient::from_config(&config.completion)
            .context("Failed to configure completion client")?;
        let retriever = build_retriever(config, progress).await?;

        Ok(Self::new(
            retriever,
            PromptAssembler::from_config(&config.assistant),
            completion,
        )
        .with_streaming(config.completion.stream)
        .with_greeting(config.assistant.greeting()))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn prompt(&self) -> &PromptAssembler {
        &self.prompt
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn streams(&self) -> bool {
        self.stream
    }

    /// Top-k snippets for `question`. Failures are logged and returned as
    /// an empty context with `error` set.
    pub async fn retrieve_context(&self, question: &str) -> RetrievedContext {
        match self.retriever.retrieve_top(question).await {
            Ok(chunks) => RetrievedContext {
                chunks,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, answering without context");
                RetrievedContext {
                    chunks: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Answers `question` given the caller's prior conversation.
    pub async fn ask(&self, question: &str, history: &[ChatMessage]) -> Answer {
        self.ask_with(question, history, self.stream).await
    }

    /// [`Copilot::ask`] with an explicit streaming choice.
    pub async fn ask_with(&self, question: &str, history: &[ChatMessage], stream: bool) -> Answer {
        let context = self.retrieve_context(question).await;
        let prompt = self.prompt.assemble(question, &context.chunks, history);
        let completion = self.completion.complete(&prompt, stream).await;
        Answer {
            context,
            prompt,
            completion,
        }
    }
}

/// Loads the corpus, embeds it, and wraps the index in a [`Retriever`].
///
/// Fails on a missing or empty corpus and on any embedding error.
pub async fn build_retriever(config: &Config, progress: &dyn IndexProgress) -> Result<Retriever> {
    let documents = load_documents(&config.corpus)?;
    let embedder = create_embedder(&config.embedding)
        .await
        .with_context(|| format!("Failed to create '{}' embedder", config.embedding.provider))?;

    let index = VectorIndex::build(
        &documents,
        &config.chunking,
        embedder.as_ref(),
        config.embedding.batch_size,
        progress,
    )
    .await?;

    Ok(Retriever::new(
        Arc::new(index),
        embedder,
        config.retrieval.top_k,
    ))
}
