//! Index statistics and integrity checks.
//!
//! `cdx stats` summarizes what's indexed: chunk counts, per-kind and
//! per-source breakdowns, model, dimensions, and file sizes. `cdx verify`
//! re-reads the persisted pair and reports the parity invariant without
//! touching anything.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::IndexError;
use crate::index::VectorIndex;

pub fn run_stats(config: &Config) -> Result<()> {
    let vec_path = config.index.vector_path();
    let meta_path = config.index.metadata_path();
    let index = VectorIndex::load(&vec_path, &meta_path)?;

    let vec_size = std::fs::metadata(&vec_path).map(|m| m.len()).unwrap_or(0);
    let meta_size = std::fs::metadata(&meta_path).map(|m| m.len()).unwrap_or(0);

    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    let mut sources: BTreeMap<&str, usize> = BTreeMap::new();
    for record in index.records() {
        *by_kind.entry(format!("{:?}", record.kind)).or_default() += 1;
        *sources.entry(record.source_id.as_str()).or_default() += 1;
    }

    println!("corpus-index — Index Stats");
    println!("==========================");
    println!();
    println!("  Vectors:     {}", vec_path.display());
    println!("  Metadata:    {}", meta_path.display());
    println!("  Size:        {} + {}", format_bytes(vec_size), format_bytes(meta_size));
    println!();
    println!("  Model:       {}", index.model());
    println!("  Dimensions:  {}", index.dims());
    println!("  Chunks:      {}", index.len());
    println!("  Sources:     {}", sources.len());

    if !by_kind.is_empty() {
        println!();
        println!("  By kind:");
        for (kind, count) in &by_kind {
            println!("  {:<20} {:>8}", kind, count);
        }
    }

    println!();
    Ok(())
}

pub fn run_verify(config: &Config) -> Result<()> {
    let vec_path = config.index.vector_path();
    let meta_path = config.index.metadata_path();

    match VectorIndex::verify(&vec_path, &meta_path) {
        Ok((vectors, records)) => {
            println!("OK: {} vectors, {} metadata records", vectors, records);
            Ok(())
        }
        Err(e @ IndexError::Mismatch { .. }) => {
            eprintln!("CORRUPT: {}", e);
            eprintln!("Rebuild the index with `cdx build`.");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
