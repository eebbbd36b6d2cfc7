//! Core data types that flow through the indexing and retrieval pipeline.
//!
//! A [`Document`] comes from an external parser, the chunker breaks it into
//! [`Chunk`]s, the batcher pairs each chunk with an embedding vector, and the
//! index stores one [`ChunkRecord`] per vector at the same ordinal position.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Type tag attached to every source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Code,
    Sql,
    SpreadsheetSheet,
    GenericText,
    ManualNote,
}

/// Shape and backing data of a spreadsheet sheet, carried through to its
/// chunks so the sheet can be reconstructed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetInfo {
    pub sheet_name: String,
    pub rows: usize,
    pub cols: usize,
    #[serde(default)]
    pub headers: Vec<String>,
    /// Raw CSV bytes of the sheet, when the parser provided them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_bytes: Option<Vec<u8>>,
}

/// Raw text plus identity, as supplied by an external parser.
/// Immutable once read.
#[derive(Debug, Clone)]
pub struct Document {
    /// File path, sheet name, or logical title.
    pub source_id: String,
    pub kind: DocumentKind,
    pub text: String,
    pub sheet: Option<SheetInfo>,
}

impl Document {
    pub fn new(source_id: impl Into<String>, kind: DocumentKind, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            text: text.into(),
            sheet: None,
        }
    }

    pub fn with_sheet(mut self, sheet: SheetInfo) -> Self {
        self.sheet = Some(sheet);
        self
    }
}

/// A contiguous, token-budgeted fragment of one document.
/// Created by the chunker; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub source_id: String,
    pub kind: DocumentKind,
    /// Ordinal within the originating document, starting at 0.
    pub chunk_id: usize,
    pub text: String,
    pub token_estimate: usize,
    pub sheet: Option<SheetInfo>,
}

impl Chunk {
    /// SHA-256 hex hash of the chunk text, used for staleness detection.
    pub fn text_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Metadata record stored at the same ordinal position as the chunk's
/// vector. The metadata file is an ordered array of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub source_id: String,
    pub kind: DocumentKind,
    pub chunk_id: usize,
    pub text: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<SheetInfo>,
}

impl From<&Chunk> for ChunkRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            source_id: chunk.source_id.clone(),
            kind: chunk.kind,
            chunk_id: chunk.chunk_id,
            text: chunk.text.clone(),
            hash: chunk.text_hash(),
            sheet: chunk.sheet.clone(),
        }
    }
}

/// A ranked query hit. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub record: ChunkRecord,
    /// Fused vector + lexical relevance score.
    pub score: f32,
    /// 1-based position in the ranked result list.
    pub rank: usize,
}
