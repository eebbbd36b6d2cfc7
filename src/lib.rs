//! # corpus-index
//!
//! Structure-aware chunking, checkpointed embedding, and hybrid
//! lexical + semantic retrieval over a persisted flat vector index.
//!
//! The pipeline scans a source tree, splits each document along its
//! structural seams (brace blocks for code, procedure units for SQL,
//! paragraphs for prose), embeds the chunks in token-budgeted batches
//! with durable per-batch checkpoints, and persists a vector file paired
//! with an ordered metadata file. Queries fuse exact L2 nearest-neighbour
//! similarity with BM25 over the same chunks, degrading to lexical-only
//! ranking when the embedding provider is unavailable.
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │  reader  │──▶│  chunker  │──▶│   batcher     │──▶│  .vec + .meta │
//! │ walk+glob│   │ structural│   │ embed + ckpt │   │  (flat L2)    │
//! └──────────┘   └───────────┘   └──────────────┘   └──────┬────────┘
//!                                                         │
//!                                                   ┌─────▼─────┐
//!                                                   │ retriever │
//!                                                   │ L2 + BM25 │
//!                                                   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cdx build                       # scan, chunk, embed, persist
//! cdx search "jwt middleware"     # hybrid query
//! cdx append src/new_module.cs    # add files to an existing index
//! cdx verify                      # check vector/metadata parity
//! cdx stats                       # what's in the index
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`tokens`] | Token estimation and truncation |
//! | [`chunker`] | Structure-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`batcher`] | Batch planning and the checkpointed embed loop |
//! | [`checkpoint`] | Durable per-batch progress log |
//! | [`index`] | Flat L2 vector index + metadata store |
//! | [`retrieve`] | Hybrid BM25 + vector retrieval |
//! | [`reader`] | Source tree scanning |

pub mod batcher;
pub mod build;
pub mod checkpoint;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod progress;
pub mod reader;
pub mod retrieve;
pub mod search;
pub mod stats;
pub mod tokens;
