//! Exact (exhaustive) similarity search over dense vectors.
//!
//! Vectors are addressed by dense position, the order in which they were
//! added. Every query is compared against every stored vector, so results are
//! reproducible for a given index state.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::RagError;
use crate::vector_math::{dot, ensure_dimension, ensure_finite, squared_l2};

const BLOB_MAGIC: &[u8; 4] = b"GQVI";
const BLOB_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8 + 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Higher is closer. Equals cosine similarity on unit-length vectors.
    #[serde(alias = "IndexFlatIP", alias = "ip", alias = "cosine")]
    InnerProduct,
    /// Squared Euclidean distance, lower is closer.
    #[serde(alias = "IndexFlatL2", alias = "euclidean")]
    L2,
}

impl Metric {
    fn raw_score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::InnerProduct => dot(query, candidate),
            Metric::L2 => squared_l2(query, candidate),
        }
    }

    /// Orders `a` before `b` when `a` is the closer match.
    fn closer(self, a: f32, b: f32) -> Ordering {
        match self {
            Metric::InnerProduct => b.total_cmp(&a),
            Metric::L2 => a.total_cmp(&b),
        }
    }

    /// Maps a raw index score onto a "higher is better" similarity.
    pub fn similarity(self, raw: f32) -> f32 {
        match self {
            Metric::InnerProduct => raw,
            Metric::L2 => -raw,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Metric::InnerProduct => 0,
            Metric::L2 => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::InnerProduct),
            1 => Some(Metric::L2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    /// Inner product, or squared distance for [`Metric::L2`].
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            dimension: None,
            data: Vec::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn is_initialized(&self) -> bool {
        self.dimension.is_some()
    }

    pub fn len(&self) -> usize {
        match self.dimension {
            Some(dim) if dim > 0 => self.data.len() / dim,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        let start = position.checked_mul(dim)?;
        let end = start.checked_add(dim)?;
        self.data.get(start..end)
    }

    /// Replaces all contents; the first vector fixes the dimension.
    pub fn build(&mut self, vectors: &[Vec<f32>]) -> Result<(), RagError> {
        let first = vectors
            .first()
            .ok_or_else(|| {
                RagError::InvalidInput("cannot build an index from zero vectors".into())
            })?;
        let dim = first.len();
        if dim == 0 {
            return Err(RagError::InvalidInput("vectors must not be empty".into()));
        }
        Self::validate_batch(vectors, dim)?;

        self.dimension = Some(dim);
        self.data = vectors.iter().flatten().copied().collect();
        Ok(())
    }

    /// Appends vectors after validating the whole batch. On error nothing is added.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), RagError> {
        let dim = self.dimension.ok_or(RagError::NotInitialized)?;
        Self::validate_batch(vectors, dim)?;
        self.data.reserve(vectors.len() * dim);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn validate_batch(vectors: &[Vec<f32>], dim: usize) -> Result<(), RagError> {
        for vector in vectors {
            ensure_dimension(vector, dim)?;
            ensure_finite(vector)?;
        }
        Ok(())
    }

    /// Returns at most `k` neighbors, closest first; ties go to the lower position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        let dim = self.dimension.ok_or(RagError::NotInitialized)?;
        if self.is_empty() {
            return Err(RagError::NotInitialized);
        }
        ensure_dimension(query, dim)?;
        ensure_finite(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(position, candidate)| Neighbor {
                position,
                score: self.metric.raw_score(query, candidate),
            })
            .collect();

        let metric = self.metric;
        scored.sort_by(|a, b| {
            metric
                .closer(a.score, b.score)
                .then_with(|| a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Serializes to the opaque snapshot blob: a fixed header followed by
    /// little-endian `f32` components in position order.
    pub fn to_bytes(&self, snapshot_id: Uuid) -> Result<Vec<u8>, RagError> {
        let dim = self.dimension.ok_or(RagError::NotInitialized)?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(BLOB_MAGIC);
        out.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        out.push(self.metric.tag());
        out.extend_from_slice(&(dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(snapshot_id.as_bytes());
        out.extend(self.data.iter().flat_map(|f| f.to_le_bytes()));
        Ok(out)
    }

    /// Parses a snapshot blob, returning the index and the snapshot id stamped in it.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, Uuid), RagError> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != BLOB_MAGIC {
            return Err(RagError::integrity("vector blob has no valid header"));
        }
        let version = u32::from_le_bytes(read_array(bytes, 4)?);
        if version != BLOB_VERSION {
            return Err(RagError::integrity(format!(
                "unsupported vector blob version {version}"
            )));
        }
        let metric = Metric::from_tag(bytes[8])
            .ok_or_else(|| RagError::integrity(format!("unknown metric tag {}", bytes[8])))?;
        let dim = u32::from_le_bytes(read_array(bytes, 9)?) as usize;
        let count = u64::from_le_bytes(read_array(bytes, 13)?) as usize;
        let snapshot_id = Uuid::from_bytes(read_array(bytes, 21)?);

        let payload = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| RagError::integrity("vector blob header overflows"))?;
        if dim == 0 || payload.len() != expected {
            return Err(RagError::integrity(format!(
                "vector blob declares {count} x {dim} floats but carries {} bytes",
                payload.len()
            )));
        }

        let data = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok((
            Self {
                metric,
                dimension: Some(dim),
                data,
            },
            snapshot_id,
        ))
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], RagError> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| RagError::integrity("vector blob truncated"))
}
