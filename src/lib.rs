//! # IR Copilot
//!
//! A retrieval-augmented chat assistant for one public company's
//! investor-relations material: filings, earnings decks, press releases,
//! and financial summaries.
//!
//! The corpus is loaded and embedded once at startup. Each question is
//! answered by retrieving the most similar snippets, assembling them with
//! the conversation into a prompt, and sending that to an OpenAI-compatible
//! chat completion endpoint with bounded retry. Questions about anything
//! other than the configured company are politely refused.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunk+Embed │──▶│ VectorIndex  │
//! │ FS+docs  │   │             │   │ (in memory)  │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │ Retriever
//!                                         ▼
//!             ┌────────────────┐   ┌──────────────┐
//! question ──▶│ PromptAssembler│──▶│  Completion  │──▶ text | stream | failed
//!             └────────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF and OOXML text extraction |
//! | [`loader`] | Corpus directory loading |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding providers |
//! | [`index`] | In-memory vector index |
//! | [`retriever`] | Top-k similarity retrieval |
//! | [`prompt`] | Prompt assembly and refusal policy |
//! | [`retry`] | Randomized exponential backoff |
//! | [`completion`] | Chat completion client and SSE streaming |
//! | [`copilot`] | The question-answering pipeline |
//! | [`progress`] | Index build progress reporting |
//! | [`chat`] | Terminal chat and one-shot questions |
//! | [`inspect`] | Index and retrieval inspection commands |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod copilot;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod inspect;
pub mod loader;
pub mod models;
pub mod progress;
pub mod prompt;
pub mod retriever;
pub mod retry;
pub mod server;
