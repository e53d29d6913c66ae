//! In-memory vector index over document chunks.
//!
//! The index is built once per process: documents are chunked, chunk texts
//! are embedded in batches, and every `(chunk, vector)` pair is kept in
//! memory. Search is an exact brute-force cosine scan, so results are
//! deterministic for a given corpus and embedder.
//!
//! # Ordering
//!
//! [`VectorIndex::search`] returns at most `k` chunks by descending score.
//! Ties keep insertion order (documents sorted by path, chunks by index).

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{Chunk, Document, ScoredChunk};
use crate::progress::{IndexEvent, IndexProgress};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("corpus directory not found: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("no readable documents under {}", path.display())]
    EmptyCorpus { path: PathBuf },

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("embedding failed: {0:#}")]
    Embedding(#[from] anyhow::Error),

    #[error("embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Chunks with their embedding vectors.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: Vec<(Chunk, Vec<f32>)>,
    document_count: usize,
    dims: usize,
}

impl VectorIndex {
    /// Chunks and embeds `documents`.
    ///
    /// Fails with [`IndexError::EmptyCorpus`] if the documents yield no
    /// chunks, and if any batch fails to embed or returns vectors of the
    /// wrong shape; a partially built or empty index is never returned.
    pub async fn build(
        documents: &[Document],
        chunking: &ChunkingConfig,
        embedder: &dyn Embedder,
        batch_size: usize,
        progress: &dyn IndexProgress,
    ) -> Result<Self, IndexError> {
        progress.report(IndexEvent::Loaded {
            documents: documents.len(),
        });

        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| chunk_document(doc, chunking))
            .collect();
        if chunks.is_empty() {
            let path = documents
                .first()
                .and_then(|doc| doc.source_path.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Err(IndexError::EmptyCorpus { path });
        }

        let dims = embedder.dims();
        let total = chunks.len();
        let mut entries = Vec::with_capacity(total);
        let mut embedded = 0usize;

        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(IndexError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != dims {
                    return Err(IndexError::DimensionMismatch {
                        expected: dims,
                        actual: vector.len(),
                    });
                }
                entries.push((chunk.clone(), vector));
            }

            embedded += batch.len();
            progress.report(IndexEvent::Embedding {
                done: embedded,
                total,
            });
        }

        progress.report(IndexEvent::Ready {
            chunks: entries.len(),
        });
        tracing::info!(
            documents = documents.len(),
            chunks = entries.len(),
            dims,
            model = embedder.model_name(),
            "index built"
        );

        Ok(Self {
            entries,
            document_count: documents.len(),
            dims,
        })
    }

    /// The `k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, (_, vector))| (i, cosine_similarity(query, vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].0.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|(chunk, _)| chunk)
    }
}
