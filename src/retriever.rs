//! Similarity retrieval over the vector index.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::index::{IndexError, VectorIndex};
use crate::models::ScoredChunk;

/// Embeds questions and looks them up in a [`VectorIndex`].
///
/// Holds the same embedder instance that built the index, so query and
/// chunk vectors live in the same space.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k: top_k.max(1),
        }
    }

    /// Default result count.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// At most `k` chunks, by non-increasing similarity to `question`.
    ///
    /// A blank question matches nothing and returns an empty list without
    /// calling the embedder.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed_query(question).await?;
        let results = self.index.search(&query, k)?;
        tracing::debug!(
            k,
            hits = results.len(),
            best = results.first().map(|r| r.score),
            "retrieved context"
        );
        Ok(results)
    }

    /// [`Retriever::retrieve`] with the configured `top_k`.
    pub async fn retrieve_top(&self, question: &str) -> Result<Vec<ScoredChunk>, IndexError> {
        self.retrieve(question, self.top_k).await
    }
}
