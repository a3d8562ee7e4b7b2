//! The fragment index: fragment records, identity map and vectors kept in
//! lock-step, plus the async indexer that feeds it through the embedding
//! client.
//!
//! Invariant: `fragments.len() == identity.len() == vectors.len()` and
//! fragment `i` is the one whose identifier maps to dense position `i`.

use std::ops::Range;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::embedding::EmbeddingClient;
use super::fragment::{Fragment, FragmentStore};
use super::identity::IdentityMap;
use super::snapshot::{IndexStore, LoadReport, Provenance};
use super::vector_index::{FlatIndex, Metric, Neighbor};
use crate::core::errors::RagError;

#[derive(Debug, Clone)]
pub struct FragmentIndex {
    fragments: FragmentStore,
    identity: IdentityMap,
    vectors: FlatIndex,
}

impl FragmentIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            fragments: FragmentStore::new(),
            identity: IdentityMap::new(),
            vectors: FlatIndex::new(metric),
        }
    }

    /// Assembles an index from restored parts, rejecting any count disagreement.
    pub fn from_parts(
        fragments: FragmentStore,
        identity: IdentityMap,
        vectors: FlatIndex,
    ) -> Result<Self, RagError> {
        let index = Self {
            fragments,
            identity,
            vectors,
        };
        index.check_consistency()?;
        Ok(index)
    }

    pub fn check_consistency(&self) -> Result<(), RagError> {
        let (v, f, m) = (self.vectors.len(), self.fragments.len(), self.identity.len());
        if v != f || f != m || m != self.identity.next_free_position() {
            return Err(RagError::integrity(format!(
                "vector count {v}, fragment count {f} and identity map size {m} disagree"
            )));
        }
        for (position, fragment) in self.fragments.iter().enumerate() {
            let mapped = self.identity.forward_lookup(position).map_err(RagError::integrity)?;
            if mapped != fragment.fragment_id {
                return Err(RagError::integrity(format!(
                    "position {position} maps to {mapped} but holds fragment {}",
                    fragment.fragment_id
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.vectors.is_initialized()
    }

    pub fn metric(&self) -> Metric {
        self.vectors.metric()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.vectors.dimension()
    }

    pub fn fragments(&self) -> &FragmentStore {
        &self.fragments
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn vectors(&self) -> &FlatIndex {
        &self.vectors
    }

    pub fn fragment_at(&self, position: usize) -> Option<&Fragment> {
        self.fragments.get(position)
    }

    pub fn fragment(&self, fragment_id: &str) -> Result<&Fragment, RagError> {
        let position = self.identity.reverse_lookup(fragment_id)?;
        self.fragments
            .get(position)
            .ok_or_else(|| RagError::NotFound(format!("fragment id {fragment_id}")))
    }

    /// Replaces the whole index. Validation happens before anything is
    /// swapped in, so a failed build keeps the previous contents.
    pub fn build(
        &mut self,
        fragments: Vec<Fragment>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), RagError> {
        ensure_paired(&fragments, &vectors)?;
        if fragments.is_empty() {
            return Err(RagError::InvalidInput("cannot build an index from zero fragments".into()));
        }

        let mut identity = IdentityMap::new();
        for fragment in &fragments {
            identity.assign(&fragment.fragment_id)?;
        }
        let mut flat = FlatIndex::new(self.vectors.metric());
        flat.build(&vectors)?;

        self.identity = identity;
        self.vectors = flat;
        self.fragments = FragmentStore::from_vec(fragments);
        Ok(())
    }

    /// Appends fragments, returning the dense positions they received.
    /// On any error the index is left unmodified.
    pub fn add(
        &mut self,
        fragments: Vec<Fragment>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Range<usize>, RagError> {
        if !self.is_initialized() {
            return Err(RagError::NotInitialized);
        }
        ensure_paired(&fragments, &vectors)?;
        self.identity
            .check_assignable(fragments.iter().map(|f| f.fragment_id.as_str()))?;
        self.vectors.add(&vectors)?;

        let start = self.identity.next_free_position();
        for fragment in &fragments {
            self.identity.assign(&fragment.fragment_id)?;
        }
        self.fragments.extend(fragments);
        Ok(start..self.identity.next_free_position())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        self.vectors.search(query, k)
    }
}

fn ensure_paired(fragments: &[Fragment], vectors: &[Vec<f32>]) -> Result<(), RagError> {
    if fragments.len() != vectors.len() {
        return Err(RagError::InvalidInput(format!(
            "{} fragments but {} vectors",
            fragments.len(),
            vectors.len()
        )));
    }
    Ok(())
}

/// Single-writer, multiple-reader handle shared by the indexer and retrieval.
pub type SharedIndex = Arc<RwLock<FragmentIndex>>;

/// Drives build/add/save/load for a [`SharedIndex`].
///
/// Embedding happens before the write lock is taken, so readers keep
/// searching during the remote calls and a failed embedding never touches
/// the index.
#[derive(Clone)]
pub struct FragmentIndexer {
    embedder: EmbeddingClient,
    index: SharedIndex,
}

impl FragmentIndexer {
    pub fn new(embedder: EmbeddingClient, metric: Metric) -> Self {
        Self::with_index(embedder, Arc::new(RwLock::new(FragmentIndex::new(metric))))
    }

    pub fn with_index(embedder: EmbeddingClient, index: SharedIndex) -> Self {
        Self { embedder, index }
    }

    pub fn shared(&self) -> SharedIndex {
        Arc::clone(&self.index)
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    pub async fn build_index(&self, fragments: Vec<Fragment>) -> Result<(), RagError> {
        if fragments.is_empty() {
            return Err(RagError::InvalidInput("cannot build an index from zero fragments".into()));
        }
        IdentityMap::new().check_assignable(fragments.iter().map(|f| f.fragment_id.as_str()))?;

        tracing::info!("Building index from {} fragments", fragments.len());
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let mut index = self.index.write().await;
        index.build(fragments, vectors)?;
        tracing::info!(
            "Index built: {} vectors, dimension {:?}",
            index.len(),
            index.dimension()
        );
        Ok(())
    }

    /// Embeds and appends fragments; returns the number added.
    pub async fn add_fragments(&self, fragments: Vec<Fragment>) -> Result<usize, RagError> {
        {
            let index = self.index.read().await;
            if !index.is_initialized() {
                return Err(RagError::NotInitialized);
            }
            if fragments.is_empty() {
                return Ok(0);
            }
            index
                .identity()
                .check_assignable(fragments.iter().map(|f| f.fragment_id.as_str()))?;
        }

        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let mut index = self.index.write().await;
        let positions = index.add(fragments, vectors)?;
        tracing::info!(
            "Added {} fragments at positions {:?}, index now holds {}",
            positions.len(),
            positions,
            index.len()
        );
        Ok(positions.len())
    }

    /// Persists the current state. Holding the read lock excludes writers
    /// for the duration of the save.
    pub async fn save(&self, store: &IndexStore) -> Result<Provenance, RagError> {
        let index = self.index.read().await;
        store.save(&index, self.embedder.config())
    }

    /// Replaces the in-memory index with the snapshot in `store`.
    pub async fn load(&self, store: &IndexStore) -> Result<LoadReport, RagError> {
        let mut index = self.index.write().await;
        let (loaded, report) = store.load(self.embedder.model_name())?;
        *index = loaded;
        Ok(report)
    }
}
