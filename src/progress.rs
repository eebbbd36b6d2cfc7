//! Embedding job progress reporting.
//!
//! Reports observable progress during `cdx build` and `cdx append` so users
//! see how many batches remain and when a checkpoint resume skipped work.
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for an embedding job.
#[derive(Clone, Debug)]
pub enum EmbedProgressEvent {
    /// Batches planned; job is about to start.
    Planned { chunks: u64, batches: u64 },
    /// A checkpoint covered a prefix of the plan; those batches are skipped.
    Resumed { batches_done: u64, batches: u64 },
    /// One batch completed.
    BatchDone {
        batch: u64,
        batches: u64,
        chunks_done: u64,
        chunks: u64,
    },
}

/// Reports embedding progress. Implementations write to stderr (human or
/// JSON).
pub trait EmbedProgressReporter: Send + Sync {
    fn report(&self, event: EmbedProgressEvent);
}

/// Human-friendly progress on stderr: "embed  batch 12 / 40  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl EmbedProgressReporter for StderrProgress {
    fn report(&self, event: EmbedProgressEvent) {
        let line = match &event {
            EmbedProgressEvent::Planned { chunks, batches } => {
                format!(
                    "embed  planned {} chunks in {} batches\n",
                    format_number(*chunks),
                    format_number(*batches)
                )
            }
            EmbedProgressEvent::Resumed {
                batches_done,
                batches,
            } => {
                format!(
                    "embed  resuming from checkpoint: {} / {} batches already done\n",
                    format_number(*batches_done),
                    format_number(*batches)
                )
            }
            EmbedProgressEvent::BatchDone {
                batch,
                batches,
                chunks_done,
                chunks,
            } => {
                format!(
                    "embed  batch {} / {}  {} / {} chunks\n",
                    format_number(*batch),
                    format_number(*batches),
                    format_number(*chunks_done),
                    format_number(*chunks)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl EmbedProgressReporter for JsonProgress {
    fn report(&self, event: EmbedProgressEvent) {
        let obj = match &event {
            EmbedProgressEvent::Planned { chunks, batches } => serde_json::json!({
                "event": "progress",
                "phase": "planned",
                "chunks": chunks,
                "batches": batches
            }),
            EmbedProgressEvent::Resumed {
                batches_done,
                batches,
            } => serde_json::json!({
                "event": "progress",
                "phase": "resumed",
                "batches_done": batches_done,
                "batches": batches
            }),
            EmbedProgressEvent::BatchDone {
                batch,
                batches,
                chunks_done,
                chunks,
            } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "batch": batch,
                "batches": batches,
                "chunks_done": chunks_done,
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl EmbedProgressReporter for NoProgress {
    fn report(&self, _event: EmbedProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn EmbedProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
