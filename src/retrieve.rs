//! Hybrid lexical + semantic retrieval over a loaded index.
//!
//! The lexical side is BM25 (k1 = 1.2, b = 0.75) over a tokenization that
//! lowercases and splits on non-alphanumeric characters; its statistics are
//! built once when the retriever is constructed. The semantic side embeds
//! the query and takes the `2 * top_k` nearest vectors by L2 distance,
//! scoring each as the inverse distance. Candidates from both channels are
//! fused by summing their scores (lexical term scaled by a configurable
//! weight); a chunk surfaced by only one channel keeps that single score.
//!
//! When the embedding provider fails at query time the retriever degrades
//! to lexical-only ranking and logs a warning rather than failing the
//! query.

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::models::RetrievalResult;
use crate::tokens::truncate_to_tokens;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Distance-to-similarity floor; keeps an exact match from dividing by
/// zero.
const DISTANCE_EPSILON: f32 = 1e-6;

/// Lowercased alphanumeric terms of `text`.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Precomputed BM25 statistics over the corpus of chunk texts.
struct Bm25Index {
    /// Term lists per document, in index ordinal order.
    docs: Vec<Vec<String>>,
    avg_len: f32,
}

impl Bm25Index {
    fn build(texts: impl Iterator<Item = impl AsRef<str>>) -> Self {
        let docs: Vec<Vec<String>> = texts.map(|t| tokenize(t.as_ref())).collect();
        let total: usize = docs.iter().map(|d| d.len()).sum();
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total as f32 / docs.len() as f32
        };
        Self { docs, avg_len }
    }

    fn len(&self) -> usize {
        self.docs.len()
    }

    /// BM25 score of `query_terms` against document `ordinal`, with the
    /// plus-one idf form so every matched term contributes a strictly
    /// positive amount even when it appears in most of the corpus.
    fn score(&self, query_terms: &[String], ordinal: usize) -> f32 {
        let doc = &self.docs[ordinal];
        if doc.is_empty() || query_terms.is_empty() {
            return 0.0;
        }
        let n = self.docs.len() as f32;
        let doc_len = doc.len() as f32;

        let mut score = 0.0;
        for term in query_terms {
            let tf = doc.iter().filter(|t| *t == term).count() as f32;
            if tf == 0.0 {
                continue;
            }
            let df = self
                .docs
                .iter()
                .filter(|d| d.iter().any(|t| t == term))
                .count() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / self.avg_len);
            score += idf * (tf * (BM25_K1 + 1.0)) / denom;
        }
        score
    }
}

/// Query interface over one loaded [`VectorIndex`].
pub struct Retriever {
    index: VectorIndex,
    lexical: Bm25Index,
    provider: Option<Box<dyn EmbeddingProvider>>,
    config: RetrievalConfig,
    query_token_ceiling: usize,
}

impl Retriever {
    /// Build the retriever, computing lexical statistics up front so
    /// queries only score candidates.
    pub fn new(
        index: VectorIndex,
        provider: Option<Box<dyn EmbeddingProvider>>,
        config: RetrievalConfig,
        query_token_ceiling: usize,
    ) -> Self {
        let lexical = Bm25Index::build(index.records().iter().map(|r| r.text.as_str()));
        Self {
            index,
            lexical,
            provider,
            config,
            query_token_ceiling,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Rank the corpus against `query`, returning at most `top_k` results
    /// (best first, 1-based ranks). Ties break toward the lower ordinal so
    /// repeated queries return identical orderings.
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievalResult>, IndexError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query = truncate_to_tokens(query, self.query_token_ceiling);
        let query_terms = tokenize(&query);

        let candidates = match self.embed_query(&query).await {
            Some(query_vector) => self.hybrid_candidates(&query_vector, &query_terms)?,
            None => self.lexical_candidates(&query_terms),
        };

        let mut ranked = candidates;
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(self.config.top_k);

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(i, (ordinal, score))| RetrievalResult {
                record: self.index.records()[ordinal].clone(),
                score,
                rank: i + 1,
            })
            .collect())
    }

    /// Embed the query, or `None` when no provider is configured or the
    /// provider fails (degrade to lexical-only).
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let provider = self.provider.as_ref()?;
        match provider.embed_batch(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => {
                warn!("embedding provider returned no query vector; using lexical-only ranking");
                None
            }
            Err(e) => {
                warn!(error = %e, "query embedding failed; using lexical-only ranking");
                None
            }
        }
    }

    /// The `2 * top_k` nearest vectors are scored as inverse distance, then
    /// every record with a nonzero BM25 contribution is merged in. A chunk
    /// found by only one channel keeps that single score, so a strong
    /// lexical match outside the vector neighborhood still competes.
    fn hybrid_candidates(
        &self,
        query_vector: &[f32],
        query_terms: &[String],
    ) -> Result<Vec<(usize, f32)>, IndexError> {
        let neighbors = self.index.search(query_vector, self.config.top_k * 2)?;
        let mut fused: BTreeMap<usize, f32> = neighbors
            .into_iter()
            .map(|(ordinal, distance)| (ordinal, 1.0 / (distance + DISTANCE_EPSILON)))
            .collect();

        for ordinal in 0..self.lexical.len() {
            let contribution = self.config.lexical_weight * self.lexical.score(query_terms, ordinal);
            if contribution > 0.0 {
                *fused.entry(ordinal).or_insert(0.0) += contribution;
            }
        }

        Ok(fused.into_iter().collect())
    }

    /// Lexical-only fallback scores every document.
    fn lexical_candidates(&self, query_terms: &[String]) -> Vec<(usize, f32)> {
        (0..self.lexical.len())
            .map(|ordinal| (ordinal, self.lexical.score(query_terms, ordinal)))
            .collect()
    }
}
