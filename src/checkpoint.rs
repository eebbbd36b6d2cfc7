//! Durable progress log for embedding jobs.
//!
//! One JSONL file per job: each line records one completed batch with its
//! starting chunk offset and the vectors it produced. Batches are appended
//! in order and fsynced, so after a crash the file holds a prefix of the
//! job's batches. On resume the loader keeps only the contiguous prefix
//! starting at batch 0; anything after a gap is discarded and re-embedded.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// One completed embedding batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Batch ordinal within the job, starting at 0.
    pub batch: usize,
    /// Offset of the batch's first chunk in the job's chunk list.
    pub start: usize,
    pub vectors: Vec<Vec<f32>>,
}

/// Append-only checkpoint file for one embedding job.
pub struct CheckpointLog {
    path: PathBuf,
}

impl CheckpointLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one completed batch and sync it to disk before returning.
    pub fn record(&self, record: &BatchRecord) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record).map_err(|e| IndexError::Persistence {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load the completed batches, keeping only the contiguous prefix
    /// `0, 1, 2, ...`. Returns an empty list when no checkpoint exists.
    ///
    /// Unparseable lines terminate the scan at that point: a torn final
    /// write loses one batch, never the whole checkpoint.
    pub fn load(&self) -> Result<Vec<BatchRecord>, IndexError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut by_batch: BTreeMap<usize, BatchRecord> = BTreeMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BatchRecord>(&line) {
                Ok(record) => {
                    by_batch.insert(record.batch, record);
                }
                Err(_) => break,
            }
        }

        let mut prefix = Vec::with_capacity(by_batch.len());
        for (expected, (batch, record)) in by_batch.into_iter().enumerate() {
            if batch != expected {
                break;
            }
            prefix.push(record);
        }
        Ok(prefix)
    }

    /// Remove the checkpoint file. Called only after the job's output has
    /// been fully persisted.
    pub fn clear(&self) -> Result<(), IndexError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
