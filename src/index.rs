//! Flat L2 vector index with a paired metadata store.
//!
//! Vectors live in `<stem>.vec`, a little-endian binary file with a small
//! header; metadata lives in `<stem>.meta.json`, an ordered array of
//! [`ChunkRecord`]s under a header. Position is the join key: vector `i`
//! belongs to record `i`. The pair is written together and verified
//! together; a count mismatch is corruption, reported and never repaired.
//!
//! Search is exact: L2 distance against every stored vector. No
//! approximation, no quantization.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::ChunkRecord;

const VEC_MAGIC: &[u8; 4] = b"CDXV";
const VEC_VERSION: u32 = 1;

/// Header of the metadata JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub dims: usize,
    pub records: Vec<ChunkRecord>,
}

/// In-memory flat index: vectors and records at matching ordinals.
pub struct VectorIndex {
    dims: usize,
    model: String,
    vectors: Vec<Vec<f32>>,
    records: Vec<ChunkRecord>,
}

impl VectorIndex {
    pub fn new(dims: usize, model: impl Into<String>) -> Self {
        Self {
            dims,
            model: model.into(),
            vectors: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// Append vector/record pairs. Counts and dimensions are checked before
    /// anything is stored, so a failed add leaves the index untouched.
    pub fn add(
        &mut self,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<(), IndexError> {
        if vectors.len() != records.len() {
            return Err(IndexError::Mismatch {
                vectors: vectors.len(),
                records: records.len(),
            });
        }
        for vector in &vectors {
            if vector.len() != self.dims {
                return Err(IndexError::Dimension {
                    expected: self.dims,
                    got: vector.len(),
                });
            }
        }
        self.vectors.extend(vectors);
        self.records.extend(records);
        Ok(())
    }

    /// Exact k-nearest-neighbour search by L2 distance. Returns up to `k`
    /// `(ordinal, distance)` pairs, closest first; ties break by ordinal.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::Dimension {
                expected: self.dims,
                got: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, l2_distance(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Write the vector file and metadata file as a pair. Each file is
    /// written to a temporary sibling and renamed into place, so a crash
    /// never leaves a half-written file under the real name.
    pub fn persist(&self, vec_path: &Path, meta_path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = vec_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let vec_tmp = tmp_sibling(vec_path);
        self.write_vectors(&vec_tmp)?;
        std::fs::rename(&vec_tmp, vec_path)?;

        let meta = IndexMeta {
            built_at: Utc::now(),
            model: self.model.clone(),
            dims: self.dims,
            records: self.records.clone(),
        };
        let meta_tmp = tmp_sibling(meta_path);
        let file = File::create(&meta_tmp)?;
        serde_json::to_writer(BufWriter::new(file), &meta).map_err(|e| {
            IndexError::Persistence {
                path: meta_path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        std::fs::rename(&meta_tmp, meta_path)?;
        Ok(())
    }

    fn write_vectors(&self, path: &Path) -> Result<(), IndexError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(VEC_MAGIC)?;
        writer.write_all(&VEC_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dims as u32).to_le_bytes())?;
        writer.write_all(&(self.vectors.len() as u64).to_le_bytes())?;
        for vector in &self.vectors {
            for value in vector {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        writer.flush()?;
        writer.into_inner().map_err(|e| IndexError::Persistence {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?.sync_all()?;
        Ok(())
    }

    /// Load an index pair from disk, verifying the parity invariant.
    pub fn load(vec_path: &Path, meta_path: &Path) -> Result<Self, IndexError> {
        let (dims, vectors) = read_vectors(vec_path)?;
        let meta = read_meta(meta_path)?;

        if meta.dims != dims {
            return Err(IndexError::Dimension {
                expected: meta.dims,
                got: dims,
            });
        }
        if vectors.len() != meta.records.len() {
            return Err(IndexError::Mismatch {
                vectors: vectors.len(),
                records: meta.records.len(),
            });
        }

        Ok(Self {
            dims,
            model: meta.model,
            vectors,
            records: meta.records,
        })
    }

    /// Check the persisted pair without fully materializing an index.
    /// Returns `(vector_count, record_count)` on success.
    pub fn verify(vec_path: &Path, meta_path: &Path) -> Result<(usize, usize), IndexError> {
        let (dims, vectors) = read_vectors(vec_path)?;
        let meta = read_meta(meta_path)?;

        if meta.dims != dims {
            return Err(IndexError::Dimension {
                expected: meta.dims,
                got: dims,
            });
        }
        if vectors.len() != meta.records.len() {
            return Err(IndexError::Mismatch {
                vectors: vectors.len(),
                records: meta.records.len(),
            });
        }
        Ok((vectors.len(), meta.records.len()))
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

fn read_vectors(path: &Path) -> Result<(usize, Vec<Vec<f32>>), IndexError> {
    let persistence = |reason: &str| IndexError::Persistence {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let file = File::open(path).map_err(|e| IndexError::Persistence {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| persistence("truncated header"))?;
    if &magic != VEC_MAGIC {
        return Err(persistence("bad magic; not a vector index file"));
    }

    let mut buf4 = [0u8; 4];
    reader
        .read_exact(&mut buf4)
        .map_err(|_| persistence("truncated header"))?;
    let version = u32::from_le_bytes(buf4);
    if version != VEC_VERSION {
        return Err(persistence(&format!("unsupported version {}", version)));
    }

    reader
        .read_exact(&mut buf4)
        .map_err(|_| persistence("truncated header"))?;
    let dims = u32::from_le_bytes(buf4) as usize;

    let mut buf8 = [0u8; 8];
    reader
        .read_exact(&mut buf8)
        .map_err(|_| persistence("truncated header"))?;
    let count = u64::from_le_bytes(buf8) as usize;

    if dims == 0 && count > 0 {
        return Err(persistence("zero dimensions with nonzero count"));
    }

    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    let expected_bytes = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| persistence("header counts overflow"))?;
    if data.len() != expected_bytes {
        return Err(persistence(&format!(
            "expected {} data bytes for {} x {}-d vectors, found {}",
            expected_bytes,
            count,
            dims,
            data.len()
        )));
    }

    let mut vectors = Vec::with_capacity(count);
    for chunk in data.chunks_exact(dims * 4) {
        let vector: Vec<f32> = chunk
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        vectors.push(vector);
    }
    Ok((dims, vectors))
}

fn read_meta(path: &Path) -> Result<IndexMeta, IndexError> {
    let file = File::open(path).map_err(|e| IndexError::Persistence {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| IndexError::Persistence {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKind;

    fn record(n: usize) -> ChunkRecord {
        ChunkRecord {
            source_id: format!("doc-{}", n),
            kind: DocumentKind::GenericText,
            chunk_id: 0,
            text: format!("chunk text {}", n),
            hash: format!("hash-{}", n),
            sheet: None,
        }
    }

    #[test]
    fn test_add_rejects_count_mismatch() {
        let mut index = VectorIndex::new(2, "test-model");
        let err = index
            .add(vec![vec![0.0, 0.0]], vec![record(0), record(1)])
            .unwrap_err();
        assert!(matches!(err, IndexError::Mismatch { vectors: 1, records: 2 }));
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_rejects_wrong_dims() {
        let mut index = VectorIndex::new(3, "test-model");
        let err = index
            .add(vec![vec![0.0, 0.0]], vec![record(0)])
            .unwrap_err();
        assert!(matches!(err, IndexError::Dimension { expected: 3, got: 2 }));
    }

    #[test]
    fn test_search_orders_by_distance() {
        let mut index = VectorIndex::new(2, "test-model");
        index
            .add(
                vec![vec![10.0, 10.0], vec![1.0, 1.0], vec![5.0, 5.0]],
                vec![record(0), record(1), record(2)],
            )
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn test_search_rejects_wrong_query_dims() {
        let index = VectorIndex::new(4, "test-model");
        assert!(index.search(&[1.0], 3).is_err());
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vec_path = dir.path().join("corpus.vec");
        let meta_path = dir.path().join("corpus.meta.json");

        let mut index = VectorIndex::new(3, "test-model");
        index
            .add(
                vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
                vec![record(0), record(1)],
            )
            .unwrap();
        index.persist(&vec_path, &meta_path).unwrap();

        let loaded = VectorIndex::load(&vec_path, &meta_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dims(), 3);
        assert_eq!(loaded.model(), "test-model");
        assert_eq!(loaded.records()[1].source_id, "doc-1");

        let hits = loaded.search(&[4.0, 5.0, 6.0], 1).unwrap();
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[0].1, 0.0);
    }

    #[test]
    fn test_verify_detects_record_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let vec_path = dir.path().join("corpus.vec");
        let meta_path = dir.path().join("corpus.meta.json");

        let mut index = VectorIndex::new(2, "test-model");
        index
            .add(vec![vec![1.0, 2.0], vec![3.0, 4.0]], vec![record(0), record(1)])
            .unwrap();
        index.persist(&vec_path, &meta_path).unwrap();

        // Drop one record from the metadata file.
        let mut meta: IndexMeta =
            serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
        meta.records.pop();
        std::fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

        let err = VectorIndex::verify(&vec_path, &meta_path).unwrap_err();
        assert!(matches!(err, IndexError::Mismatch { vectors: 2, records: 1 }));
    }

    #[test]
    fn test_load_rejects_truncated_vector_file() {
        let dir = tempfile::tempdir().unwrap();
        let vec_path = dir.path().join("corpus.vec");
        let meta_path = dir.path().join("corpus.meta.json");

        let mut index = VectorIndex::new(2, "test-model");
        index.add(vec![vec![1.0, 2.0]], vec![record(0)]).unwrap();
        index.persist(&vec_path, &meta_path).unwrap();

        let data = std::fs::read(&vec_path).unwrap();
        std::fs::write(&vec_path, &data[..data.len() - 3]).unwrap();

        assert!(matches!(
            VectorIndex::load(&vec_path, &meta_path),
            Err(IndexError::Persistence { .. })
        ));
    }
}
