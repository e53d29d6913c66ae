//! Prompt assembly.
//!
//! Every request to the completion model has the shape
//!
//! ```text
//! [system persona] + [prior conversation...] + [synthesized user message]
//! ```
//!
//! The synthesized message carries the question, the retrieved snippets as
//! an enumerated list (`1. ...\n2. ...`), and the response-style line. The
//! off-topic refusal instruction is written into both the system message
//! and the synthesized message so it survives truncation of either.

use crate::config::AssistantConfig;
use crate::models::{ChatMessage, Role, ScoredChunk};

const DEFAULT_PERSONA: &str = "You are an expert on {company}'s financial statements and can \
answer questions about {company}'s business, financial metrics, and market performance. You \
only answer questions related to {company}.";

/// Builds the message list sent to the completion model.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    company: String,
    persona: String,
    response_style: String,
}

impl PromptAssembler {
    pub fn new(
        company: impl Into<String>,
        persona: Option<&str>,
        response_style: impl Into<String>,
    ) -> Self {
        let company = company.into();
        let persona = persona
            .unwrap_or(DEFAULT_PERSONA)
            .replace("{company}", &company);
        Self {
            company,
            persona,
            response_style: response_style.into(),
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(
            config.company.clone(),
            config.persona.as_deref(),
            config.response_style.clone(),
        )
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    /// The off-topic policy, repeated in the system and user messages.
    pub fn refusal_instruction(&self) -> String {
        format!(
            "If the question is not related to {company}, do not answer it; tell the user and \
             ask for a question related to {company} instead.",
            company = self.company
        )
    }

    pub fn system_message(&self) -> ChatMessage {
        ChatMessage::system(format!("{} {}", self.persona, self.refusal_instruction()))
    }

    /// Renders snippets as `1. text\n2. text...`, verbatim.
    pub fn format_context(chunks: &[ScoredChunk]) -> String {
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}", i + 1, c.text()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The per-question user message.
    pub fn user_message(&self, question: &str, context: &[ScoredChunk]) -> ChatMessage {
        let mut content = format!("The user is asking a question: {}\n\n", question.trim());

        if context.is_empty() {
            content.push_str(&format!(
                "No relevant information was retrieved from the {company} documents. Do not \
                 guess. Ask the user to rephrase the question toward {company}'s business, \
                 financial metrics, or market performance.\n\n",
                company = self.company
            ));
        } else {
            content.push_str("The retrieved information is:\n");
            content.push_str(&Self::format_context(context));
            content.push_str(
                "\n\nPlease answer the question using the retrieved information.\n\n",
            );
        }

        content.push_str(&self.refusal_instruction());
        content.push_str("\n\n");
        content.push_str(&self.response_style);

        ChatMessage::user(content)
    }

    /// `[system] + history + [user message]`.
    ///
    /// System messages in `history` are dropped so the persona is the only
    /// one, and always first.
    pub fn assemble(
        &self,
        question: &str,
        context: &[ScoredChunk],
        history: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(self.system_message());
        messages.extend(
            history
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        messages.push(self.user_message(question, context));
        messages
    }
}
