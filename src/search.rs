//! The `cdx search` command: load the index pair and run a hybrid query.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::index::VectorIndex;
use crate::models::RetrievalResult;
use crate::retrieve::Retriever;

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    lexical_only: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = VectorIndex::load(&config.index.vector_path(), &config.index.metadata_path())
        .context("Failed to load index; run `cdx build` first")?;

    let provider = if lexical_only || !config.embedding.is_enabled() {
        None
    } else {
        Some(create_provider(&config.embedding)?)
    };

    let mut retrieval = config.retrieval.clone();
    if let Some(limit) = limit {
        retrieval.top_k = limit;
    }

    let retriever = Retriever::new(
        index,
        provider,
        retrieval,
        config.embedding.query_token_ceiling,
    );
    let results = retriever.search(query).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        print_result(result);
    }
    Ok(())
}

fn print_result(result: &RetrievalResult) {
    println!(
        "{}. [{:.4}] {}#{} ({:?})",
        result.rank,
        result.score,
        result.record.source_id,
        result.record.chunk_id,
        result.record.kind
    );
    println!("   {}", snippet(&result.record.text, 200));
    println!();
}

/// The chunk text squashed to one line and capped at `max_chars`.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max_chars {
        return flat;
    }
    let mut cut = max_chars;
    while !flat.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &flat[..cut])
}
