//! The `cdx build` and `cdx append` commands: scan, chunk, embed, persist.
//!
//! `build` indexes the configured source tree from scratch. `append` loads
//! the existing index pair and adds chunks from new or changed files,
//! skipping chunks whose text hash is already stored. Both run the
//! checkpointed embedding job, so an interrupted run resumes on the next
//! invocation instead of re-spending completed batches.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::batcher::run_embed_job;
use crate::checkpoint::CheckpointLog;
use crate::chunker::chunk_document;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::index::VectorIndex;
use crate::models::{Chunk, ChunkRecord, Document};
use crate::progress::EmbedProgressReporter;
use crate::reader::{kind_for_path, scan_sources};

pub async fn run_build(config: &Config, progress: &dyn EmbedProgressReporter) -> Result<()> {
    let documents = scan_sources(&config.sources)?;
    if documents.is_empty() {
        bail!("No source files matched the configured globs");
    }
    info!(documents = documents.len(), "scanned source tree");

    let chunks = chunk_all(config, &documents);
    if chunks.is_empty() {
        bail!("Source files produced no chunks");
    }

    let (vectors, model, dims) = embed_chunks(config, &chunks, "build", progress).await?;

    let mut index = VectorIndex::new(dims, model);
    let records: Vec<ChunkRecord> = chunks.iter().map(ChunkRecord::from).collect();
    index.add(vectors, records)?;
    index.persist(&config.index.vector_path(), &config.index.metadata_path())?;

    println!(
        "Indexed {} chunks from {} documents into {}",
        index.len(),
        documents.len(),
        config.index.vector_path().display()
    );
    Ok(())
}

pub async fn run_append(
    config: &Config,
    paths: &[PathBuf],
    progress: &dyn EmbedProgressReporter,
) -> Result<()> {
    let mut index = VectorIndex::load(&config.index.vector_path(), &config.index.metadata_path())
        .context("Failed to load existing index; run `cdx build` first")?;

    let mut documents = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        documents.push(Document::new(
            path.to_string_lossy().to_string(),
            kind_for_path(path),
            text,
        ));
    }

    let chunks = chunk_all(config, &documents);
    let fresh: Vec<Chunk> = chunks
        .into_iter()
        .filter(|chunk| {
            let hash = chunk.text_hash();
            !index
                .records()
                .iter()
                .any(|r| r.source_id == chunk.source_id && r.hash == hash)
        })
        .collect();

    if fresh.is_empty() {
        println!("Nothing to append; all chunks already indexed.");
        return Ok(());
    }

    let (vectors, model, dims) = embed_chunks(config, &fresh, "append", progress).await?;
    if model != index.model() {
        bail!(
            "Index was built with model '{}' but embedding is configured for '{}'",
            index.model(),
            model
        );
    }
    if dims != index.dims() {
        bail!(
            "Index holds {}-d vectors but embedding is configured for {} dims",
            index.dims(),
            dims
        );
    }

    let records: Vec<ChunkRecord> = fresh.iter().map(ChunkRecord::from).collect();
    index.add(vectors, records)?;
    index.persist(&config.index.vector_path(), &config.index.metadata_path())?;

    println!("Appended {} chunks; index now holds {}.", fresh.len(), index.len());
    Ok(())
}

fn chunk_all(config: &Config, documents: &[Document]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(chunk_document(
            document,
            config.chunking.target_tokens,
            config.chunking.overlap_tokens,
        ));
    }
    chunks
}

async fn embed_chunks(
    config: &Config,
    chunks: &[Chunk],
    job: &str,
    progress: &dyn EmbedProgressReporter,
) -> Result<(Vec<Vec<f32>>, String, usize)> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled; configure [embedding] to build an index");
    }
    let provider = create_provider(&config.embedding)?;
    let checkpoint = CheckpointLog::new(config.index.checkpoint_path(job));

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = run_embed_job(
        provider.as_ref(),
        &texts,
        &config.embedding,
        &checkpoint,
        progress,
    )
    .await?;

    let model = provider.model_name().to_string();
    let dims = provider.dims();
    Ok((vectors, model, dims))
}
