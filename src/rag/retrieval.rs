//! Threshold-gated retrieval over the shared fragment index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::embedding::EmbeddingClient;
use super::index::{FragmentIndex, SharedIndex};
use super::vector_index::{Metric, Neighbor};
use crate::core::config::RetrievalConfig;
use crate::core::errors::RagError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub score_threshold: f32,
    pub max_results: usize,
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            score_threshold: config.score_threshold,
            max_results: config.max_results,
        }
    }
}

/// One retrieved candidate. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub fragment_id: String,
    /// Higher is more similar (negated distance for the L2 metric).
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl RetrievedFragment {
    pub fn title(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("title"))
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Drops candidates scoring strictly below `threshold`, then keeps the first
/// `max_results` in the order the index returned them.
pub fn gate(
    neighbors: &[Neighbor],
    metric: Metric,
    threshold: f32,
    max_results: usize,
) -> Vec<(usize, f32)> {
    neighbors
        .iter()
        .map(|n| (n.position, metric.similarity(n.score)))
        .filter(|(_, score)| *score >= threshold)
        .take(max_results)
        .collect()
}

#[derive(Clone)]
pub struct RetrievalPolicy {
    embedder: EmbeddingClient,
    index: SharedIndex,
}

impl RetrievalPolicy {
    pub fn new(embedder: EmbeddingClient, index: SharedIndex) -> Self {
        Self { embedder, index }
    }

    /// True once the index is built and holds at least one fragment.
    pub async fn has_content(&self) -> bool {
        let index = self.index.read().await;
        index.is_initialized() && !index.is_empty()
    }

    /// Retrieves candidates with their text and metadata attached.
    ///
    /// An empty result means "no relevant context", not a failure.
    pub async fn retrieve(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<RetrievedFragment>, RagError> {
        let vector = self.embed_query(query).await?;
        let index = self.index.read().await;
        Self::collect(&index, &vector, params, true)
    }

    /// Like [`retrieve`](Self::retrieve) but returns identifiers and scores only.
    pub async fn retrieve_ids(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<RetrievedFragment>, RagError> {
        let vector = self.embed_query(query).await?;
        let index = self.index.read().await;
        Self::collect(&index, &vector, params, false)
    }

    /// Retrieval against an already-embedded query vector.
    pub async fn retrieve_by_vector(
        &self,
        vector: &[f32],
        params: &RetrievalParams,
    ) -> Result<Vec<RetrievedFragment>, RagError> {
        let index = self.index.read().await;
        Self::collect(&index, vector, params, true)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        // Fail before spending a remote call on an index that cannot answer.
        if !self.index.read().await.is_initialized() {
            return Err(RagError::NotInitialized);
        }
        self.embedder.embed_query(query).await
    }

    fn collect(
        index: &FragmentIndex,
        vector: &[f32],
        params: &RetrievalParams,
        with_fragments: bool,
    ) -> Result<Vec<RetrievedFragment>, RagError> {
        let neighbors = index.search(vector, params.top_k)?;
        let kept = gate(&neighbors, index.metric(), params.score_threshold, params.max_results);

        let mut results = Vec::with_capacity(kept.len());
        for (position, score) in kept {
            let fragment_id = index.identity().forward_lookup(position)?.to_string();
            let (text, metadata) = match (with_fragments, index.fragment_at(position)) {
                (true, Some(fragment)) => {
                    (Some(fragment.text.clone()), Some(fragment.metadata.clone()))
                }
                _ => (None, None),
            };
            results.push(RetrievedFragment {
                fragment_id,
                score,
                text,
                metadata,
            });
        }

        tracing::debug!(
            "Retrieved {} of {} candidates (threshold {}, top_k {})",
            results.len(),
            neighbors.len(),
            params.score_threshold,
            params.top_k
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbors(scores: &[f32]) -> Vec<Neighbor> {
        scores
            .iter()
            .enumerate()
            .map(|(position, score)| Neighbor {
                position,
                score: *score,
            })
            .collect()
    }

    #[test]
    fn gate_excludes_strictly_below_threshold() {
        let kept = gate(&neighbors(&[0.9, 0.5, 0.49]), Metric::InnerProduct, 0.5, 10);
        assert_eq!(kept, vec![(0, 0.9), (1, 0.5)]);
    }

    #[test]
    fn gate_truncates_after_filtering() {
        let kept = gate(&neighbors(&[0.9, 0.1, 0.8, 0.7]), Metric::InnerProduct, 0.5, 2);
        assert_eq!(kept, vec![(0, 0.9), (2, 0.8)]);
    }

    #[test]
    fn gate_returns_empty_when_nothing_clears() {
        assert!(gate(&neighbors(&[0.2, 0.1]), Metric::InnerProduct, 0.3, 5).is_empty());
    }

    #[test]
    fn gate_negates_l2_distances() {
        let kept = gate(&neighbors(&[0.1, 0.4, 2.0]), Metric::L2, -0.5, 5);
        assert_eq!(kept, vec![(0, -0.1), (1, -0.4)]);
    }

    #[test]
    fn higher_threshold_yields_subset() {
        let input = neighbors(&[0.95, 0.7, 0.55, 0.4, 0.31, 0.2]);
        let thresholds = [0.0, 0.3, 0.35, 0.5, 0.9, 1.0];
        for (i, low) in thresholds.iter().enumerate() {
            for high in &thresholds[i..] {
                let loose = gate(&input, Metric::InnerProduct, *low, 10);
                let strict = gate(&input, Metric::InnerProduct, *high, 10);
                assert!(strict.iter().all(|hit| loose.contains(hit)));
            }
        }
    }
}
