//! Error types for the indexing and retrieval pipeline.
//!
//! Provider failures are classified so the batcher can pick a retry policy:
//! rate limits get patient back-off, transient faults get bounded back-off,
//! and fatal errors abort the job with the checkpoint preserved.

use std::path::PathBuf;
use thiserror::Error;

/// Classified failure from an embedding provider call.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Provider rejected the request due to rate limiting (HTTP 429).
    /// Recoverable: retry after back-off.
    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),

    /// Transient failure (server error, network fault). Recoverable with
    /// bounded exponential back-off.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// Non-retryable failure (bad request, auth failure, disabled provider).
    #[error("fatal embedding failure: {0}")]
    Fatal(String),
}

/// Errors surfaced by the indexing subsystem.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Input defeated every chunking strategy including the forced-split
    /// fallback. Should be unreachable, but never swallowed if it occurs.
    #[error("chunking failed for '{source_id}': {reason}")]
    Chunking { source_id: String, reason: String },

    /// Embedding job exhausted its retry policy or hit a fatal provider
    /// error. The checkpoint (if any) is preserved for a resume.
    #[error("embedding job aborted: {reason}{}", checkpoint_hint(.checkpoint))]
    EmbeddingAborted {
        reason: String,
        checkpoint: Option<PathBuf>,
    },

    /// Vector count diverged from metadata record count. Detected by
    /// `verify`, never silently repaired.
    #[error("index corruption: {vectors} vectors but {records} metadata records")]
    Mismatch { vectors: usize, records: usize },

    /// Vectors of inconsistent dimensionality were offered to one index.
    #[error("dimension mismatch: index holds {expected}-d vectors, got {got}-d")]
    Dimension { expected: usize, got: usize },

    /// A persisted file is missing, truncated, or malformed. Nothing
    /// partially written is trusted.
    #[error("persistence failure for {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn checkpoint_hint(checkpoint: &Option<PathBuf>) -> String {
    match checkpoint {
        Some(path) => format!(" (checkpoint preserved at {}; re-run to resume)", path.display()),
        None => String::new(),
    }
}
