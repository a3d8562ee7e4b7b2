//! Retrieval-augmented answering over a persisted fragment index.
//!
//! This module provides:
//! - `FragmentIndex` / `FragmentIndexer`: fragments, identity map and vectors in lock-step
//! - `IndexStore`: atomic snapshot persistence with provenance and integrity checks
//! - `RetrievalPolicy`: top-k search gated by a similarity threshold
//! - `AnswerSynthesizer`: grounded generation with closed-world citation validation

pub mod answer;
pub mod embedding;
pub mod fragment;
pub mod identity;
pub mod index;
pub mod prompt;
pub mod retrieval;
pub mod snapshot;
pub mod vector_index;

#[cfg(test)]
mod testing;

pub use answer::{AnswerResult, AnswerSynthesizer, SourceRef, NO_CONTEXT_ANSWER};
pub use embedding::EmbeddingClient;
pub use fragment::{load_fragments_json, Fragment, FragmentStore};
pub use identity::{IdentityMap, IdentityRecord};
pub use index::{FragmentIndex, FragmentIndexer, SharedIndex};
pub use retrieval::{RetrievalParams, RetrievalPolicy, RetrievedFragment};
pub use snapshot::{IndexStore, LoadReport, Provenance, SnapshotWarning};
pub use vector_index::{FlatIndex, Metric, Neighbor};
