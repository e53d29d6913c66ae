//! Core data models used throughout the copilot.
//!
//! These types represent the documents and chunks that flow through index
//! construction, the scored snippets produced by retrieval, and the chat
//! messages exchanged with the completion endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A source file normalized to plain text.
///
/// Produced once per file by the loader and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Document {
    /// Deterministic id derived from the relative path.
    pub id: String,
    /// Path relative to the corpus root.
    pub source_path: PathBuf,
    /// File name, used as a display title.
    pub title: String,
    /// MIME type the text was extracted from.
    pub content_type: String,
    pub modified_at: DateTime<Utc>,
    pub body: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `"{document_id}:{chunk_index}"`.
    pub id: String,
    pub document_id: String,
    pub source_path: PathBuf,
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk returned by similarity search, with its cosine score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl ScoredChunk {
    pub fn text(&self) -> &str {
        &self.chunk.text
    }
}

/// Message author, serialized the way chat-completion APIs expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(s)
    }
}

/// A single role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Caller-owned conversation history.
///
/// The copilot only ever reads this; the caller records each completed
/// exchange once the full answer text is known.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the user question followed by the assistant's final answer.
    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn conversation_records_user_then_assistant() {
        let mut convo = Conversation::new();
        convo.record_exchange("What was revenue?", "Revenue was $20.1B.");
        assert_eq!(convo.len(), 2);
        assert_eq!(convo.messages()[0].role, Role::User);
        assert_eq!(convo.messages()[1].role, Role::Assistant);
        convo.clear();
        assert!(convo.is_empty());
    }
}
