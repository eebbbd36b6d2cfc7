//! Batch planning and the checkpointed embedding loop.
//!
//! Planning is a pure function of the chunk texts and the token budget, so
//! a resumed job replans identical batch boundaries and can trust the
//! checkpoint's offsets. The run loop embeds one batch at a time, appends a
//! checkpoint record after each success, and applies a per-classification
//! retry policy: rate limits wait patiently, transient faults get bounded
//! exponential back-off, fatal errors abort immediately with the checkpoint
//! preserved.

use std::time::Duration;

use tracing::{debug, warn};

use crate::checkpoint::{BatchRecord, CheckpointLog};
use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbedError, IndexError};
use crate::progress::{EmbedProgressEvent, EmbedProgressReporter};
use crate::tokens::{estimate_tokens, truncate_to_tokens};

/// One planned request batch: a contiguous slice of the chunk list.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Offset of the first text in the job's chunk list.
    pub start: usize,
    pub texts: Vec<String>,
}

/// Split `texts` into request batches under `budget` estimated tokens.
///
/// Input order is preserved and every text lands in exactly one batch. A
/// text estimating above `max_single` is truncated first (lossy, logged);
/// a text that alone exceeds the batch budget still ships as a singleton
/// batch rather than being dropped.
pub fn plan_batches(texts: &[String], budget: usize, max_single: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_start = 0;
    let mut current_tokens = 0;

    for (i, text) in texts.iter().enumerate() {
        let mut text = text.clone();
        let mut tokens = estimate_tokens(&text);
        if tokens > max_single {
            warn!(
                chunk = i,
                tokens,
                max_single,
                "chunk exceeds single-text cap; truncating before embedding"
            );
            text = truncate_to_tokens(&text, max_single);
            tokens = estimate_tokens(&text);
        }

        if !current.is_empty() && current_tokens + tokens > budget {
            batches.push(Batch {
                start: current_start,
                texts: std::mem::take(&mut current),
            });
            current_start = i;
            current_tokens = 0;
        }
        current.push(text);
        current_tokens += tokens;
    }

    if !current.is_empty() {
        batches.push(Batch {
            start: current_start,
            texts: current,
        });
    }
    batches
}

/// Embed every text, one planned batch per request, checkpointing after
/// each batch. Returns one vector per input text, in input order.
///
/// On failure the checkpoint file is left in place and named in the error;
/// a re-run with the same inputs replans the same batches and resumes past
/// the completed prefix. On success the checkpoint is cleared.
pub async fn run_embed_job(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    config: &EmbeddingConfig,
    checkpoint: &CheckpointLog,
    progress: &dyn EmbedProgressReporter,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let batches = plan_batches(texts, config.batch_token_budget, config.max_single_chunk_tokens);
    progress.report(EmbedProgressEvent::Planned {
        chunks: texts.len() as u64,
        batches: batches.len() as u64,
    });

    let mut done = load_resumable_prefix(checkpoint, &batches)?;
    if !done.is_empty() {
        debug!(batches_done = done.len(), "resuming embedding job from checkpoint");
        progress.report(EmbedProgressEvent::Resumed {
            batches_done: done.len() as u64,
            batches: batches.len() as u64,
        });
    }

    let mut chunks_done: usize = done.iter().map(|r| r.vectors.len()).sum();

    for (n, batch) in batches.iter().enumerate().skip(done.len()) {
        let vectors = embed_with_retry(provider, &batch.texts, config)
            .await
            .map_err(|e| IndexError::EmbeddingAborted {
                reason: e.to_string(),
                checkpoint: checkpoint.exists().then(|| checkpoint.path().to_path_buf()),
            })?;

        if vectors.len() != batch.texts.len() {
            return Err(IndexError::EmbeddingAborted {
                reason: format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.texts.len()
                ),
                checkpoint: checkpoint.exists().then(|| checkpoint.path().to_path_buf()),
            });
        }

        let record = BatchRecord {
            batch: n,
            start: batch.start,
            vectors,
        };
        checkpoint.record(&record)?;
        chunks_done += record.vectors.len();
        progress.report(EmbedProgressEvent::BatchDone {
            batch: (n + 1) as u64,
            batches: batches.len() as u64,
            chunks_done: chunks_done as u64,
            chunks: texts.len() as u64,
        });
        done.push(record);
    }

    let mut vectors = Vec::with_capacity(texts.len());
    for record in &done {
        vectors.extend(record.vectors.iter().cloned());
    }
    if vectors.len() != texts.len() {
        return Err(IndexError::EmbeddingAborted {
            reason: format!(
                "job produced {} vectors for {} texts",
                vectors.len(),
                texts.len()
            ),
            checkpoint: checkpoint.exists().then(|| checkpoint.path().to_path_buf()),
        });
    }

    checkpoint.clear()?;
    Ok(vectors)
}

/// Load checkpointed batches that still line up with the current plan.
/// A record whose offsets or sizes disagree with the replanned batch (the
/// inputs changed under us) invalidates itself and everything after it.
fn load_resumable_prefix(
    checkpoint: &CheckpointLog,
    batches: &[Batch],
) -> Result<Vec<BatchRecord>, IndexError> {
    let recorded = checkpoint.load()?;
    let mut prefix = Vec::with_capacity(recorded.len());
    for record in recorded {
        let Some(planned) = batches.get(record.batch) else {
            break;
        };
        if record.start != planned.start || record.vectors.len() != planned.texts.len() {
            warn!(
                batch = record.batch,
                "checkpoint disagrees with planned batches; discarding from here"
            );
            break;
        }
        prefix.push(record);
    }
    Ok(prefix)
}

async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    config: &EmbeddingConfig,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut transient_attempts: u32 = 0;
    let mut rate_limit_attempts: u32 = 0;

    loop {
        match provider.embed_batch(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(EmbedError::RateLimited(msg)) => {
                rate_limit_attempts += 1;
                if rate_limit_attempts > config.rate_limit_max_retries {
                    return Err(EmbedError::RateLimited(msg));
                }
                let delay = backoff_delay(rate_limit_attempts);
                warn!(
                    attempt = rate_limit_attempts,
                    delay_secs = delay.as_secs(),
                    "rate limited; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(EmbedError::Transient(msg)) => {
                transient_attempts += 1;
                if transient_attempts > config.max_retries {
                    return Err(EmbedError::Transient(msg));
                }
                let delay = backoff_delay(transient_attempts);
                warn!(
                    attempt = transient_attempts,
                    delay_secs = delay.as_secs(),
                    error = %msg,
                    "transient embedding failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(fatal @ EmbedError::Fatal(_)) => return Err(fatal),
        }
    }
}

/// 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic provider: embeds each text as `[len, first_byte]`.
    struct StubProvider {
        calls: AtomicUsize,
        fail_from_call: Option<usize>,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: None,
            }
        }

        fn failing_from(call: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: Some(call),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_from) = self.fail_from_call {
                if call >= fail_from {
                    return Err(EmbedError::Fatal("stub failure".into()));
                }
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, *t.as_bytes().first().unwrap_or(&0) as f32])
                .collect())
        }
    }

    fn config_with_budget(budget: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_token_budget: budget,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_plan_respects_budget_and_order() {
        // Each text estimates to ~25 tokens (100 chars, few words).
        let texts: Vec<String> = (0..10).map(|i| format!("{:0>100}", i)).collect();
        let batches = plan_batches(&texts, 60, 4500);

        assert!(batches.len() > 1);
        let mut flattened = Vec::new();
        for batch in &batches {
            assert!(batch.texts.iter().map(|t| estimate_tokens(t)).sum::<usize>() <= 60);
            flattened.extend(batch.texts.clone());
        }
        assert_eq!(flattened, texts);

        // Starts are cumulative offsets.
        let mut offset = 0;
        for batch in &batches {
            assert_eq!(batch.start, offset);
            offset += batch.texts.len();
        }
    }

    #[test]
    fn test_plan_truncates_oversized_text() {
        let texts = vec!["x".repeat(100_000)];
        let batches = plan_batches(&texts, 4000, 4500);
        assert_eq!(batches.len(), 1);
        let planned = &batches[0].texts[0];
        assert!(planned.len() < 100_000);
        assert!(planned.ends_with(crate::tokens::TRUNCATION_MARKER));
    }

    #[test]
    fn test_plan_over_budget_singleton_still_ships() {
        // Over the batch budget but under the single-text cap.
        let texts = vec!["y".repeat(17_000), "short".to_string()];
        let batches = plan_batches(&texts, 4000, 4500);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].texts.len(), 1);
        assert_eq!(batches[1].texts[0], "short");
    }

    #[test]
    fn test_plan_empty_input() {
        assert!(plan_batches(&[], 4000, 4500).is_empty());
    }

    #[tokio::test]
    async fn test_job_success_clears_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointLog::new(dir.path().join("job.checkpoint.jsonl"));
        let provider = StubProvider::new();
        let texts: Vec<String> = (0..8).map(|i| format!("{:0>100}", i)).collect();

        let vectors = run_embed_job(&provider, &texts, &config_with_budget(60), &checkpoint, &NoProgress)
            .await
            .unwrap();

        assert_eq!(vectors.len(), texts.len());
        assert_eq!(vectors[0][0], 100.0);
        assert!(!checkpoint.exists());
    }

    #[tokio::test]
    async fn test_job_failure_preserves_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointLog::new(dir.path().join("job.checkpoint.jsonl"));
        // Two texts per batch at this budget; fail on the third request.
        let provider = StubProvider::failing_from(2);
        let texts: Vec<String> = (0..8).map(|i| format!("{:0>100}", i)).collect();

        let err = run_embed_job(&provider, &texts, &config_with_budget(60), &checkpoint, &NoProgress)
            .await
            .unwrap_err();

        match err {
            IndexError::EmbeddingAborted { checkpoint: Some(path), .. } => {
                assert!(path.exists());
            }
            other => panic!("expected aborted-with-checkpoint, got {:?}", other),
        }
        assert_eq!(checkpoint.load().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_matches_uninterrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        let texts: Vec<String> = (0..8).map(|i| format!("{:0>100}", i)).collect();
        let config = config_with_budget(60);

        // Uninterrupted reference run.
        let reference_checkpoint = CheckpointLog::new(dir.path().join("ref.checkpoint.jsonl"));
        let reference =
            run_embed_job(&StubProvider::new(), &texts, &config, &reference_checkpoint, &NoProgress)
                .await
                .unwrap();

        // Interrupted run, then resume.
        let checkpoint = CheckpointLog::new(dir.path().join("job.checkpoint.jsonl"));
        let flaky = StubProvider::failing_from(2);
        run_embed_job(&flaky, &texts, &config, &checkpoint, &NoProgress)
            .await
            .unwrap_err();

        let resumed_provider = StubProvider::new();
        let resumed = run_embed_job(&resumed_provider, &texts, &config, &checkpoint, &NoProgress)
            .await
            .unwrap();

        assert_eq!(resumed.len(), reference.len());
        for (a, b) in resumed.iter().zip(reference.iter()) {
            assert_eq!(a, b);
        }
        // Resume only embedded the batches past the checkpointed prefix.
        assert!(resumed_provider.calls.load(Ordering::SeqCst) < 4);
        assert!(!checkpoint.exists());
    }

    #[tokio::test]
    async fn test_stale_checkpoint_discarded_when_inputs_change() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointLog::new(dir.path().join("job.checkpoint.jsonl"));
        let config = config_with_budget(60);

        let original: Vec<String> = (0..8).map(|i| format!("{:0>100}", i)).collect();
        let flaky = StubProvider::failing_from(2);
        run_embed_job(&flaky, &original, &config, &checkpoint, &NoProgress)
            .await
            .unwrap_err();

        // Different corpus shape: checkpoint offsets no longer line up.
        let changed: Vec<String> = (0..5).map(|i| format!("{:0>220}", i)).collect();
        let provider = StubProvider::new();
        let vectors = run_embed_job(&provider, &changed, &config, &checkpoint, &NoProgress)
            .await
            .unwrap();

        assert_eq!(vectors.len(), changed.len());
        assert_eq!(vectors[0][0], 220.0);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }
}
