//! `copilot index` and `copilot retrieve`: look at the index without
//! calling the completion model.
//!
//! Neither command needs a completion API key, so both are safe for
//! checking a corpus and embedding setup before going live.

use anyhow::{bail, Result};
use std::time::Instant;

use crate::config::Config;
use crate::copilot::build_retriever;
use crate::progress::{format_number, ProgressMode};

/// Builds the index and prints its size.
pub async fn run_index(config: &Config) -> Result<()> {
    let progress = ProgressMode::default_for_tty().reporter();
    let started = Instant::now();
    let retriever = build_retriever(config, progress.as_ref()).await?;
    let index = retriever.index();

    println!("corpus:     {}", config.corpus.root.display());
    println!("documents:  {}", format_number(index.document_count()));
    println!("chunks:     {}", format_number(index.len()));
    println!(
        "embedding:  {} ({} dims)",
        retriever.embedder().model_name(),
        index.dims()
    );
    println!("elapsed:    {:.2?}", started.elapsed());
    Ok(())
}

/// Prints the top-`k` snippets for `question` with scores and sources.
pub async fn run_retrieve(config: &Config, question: &str, k: Option<usize>) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let progress = ProgressMode::default_for_tty().reporter();
    let retriever = build_retriever(config, progress.as_ref()).await?;
    let k = k.unwrap_or(retriever.top_k());
    let results = retriever.retrieve(question, k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}",
            rank + 1,
            result.score,
            result.chunk.source_path.display()
        );
        for line in result.text().lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}
