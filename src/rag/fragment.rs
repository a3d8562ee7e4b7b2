//! Fragment records and the append-only store that holds them.
//!
//! Fragments are produced upstream (document parsing and splitting) and are
//! immutable once they reach this crate.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::RagError;

/// An immutable unit of source text, the atomic unit indexed and cited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Globally unique, stable identifier.
    #[serde(alias = "chunk_id")]
    pub fragment_id: String,
    pub text: String,
    /// Ordered metadata (title, level, chunk_index, source, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Fragment {
    pub fn new(fragment_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata
            .get("title")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Ordered collection of fragments. Position `i` holds the fragment whose
/// dense index position is `i`.
#[derive(Debug, Clone, Default)]
pub struct FragmentStore {
    fragments: Vec<Fragment>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Fragment> {
        self.fragments.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub(crate) fn extend(&mut self, fragments: Vec<Fragment>) {
        self.fragments.extend(fragments);
    }

    /// Serializes the store as JSON lines, one fragment per line.
    pub fn to_jsonl(&self) -> Result<String, RagError> {
        let mut out = String::new();
        for fragment in &self.fragments {
            out.push_str(&serde_json::to_string(fragment)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn from_jsonl(contents: &str) -> Result<Self, RagError> {
        let mut fragments = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fragment: Fragment = serde_json::from_str(line).map_err(|e| {
                RagError::integrity(format!("fragment record on line {}: {e}", line_no + 1))
            })?;
            fragments.push(fragment);
        }
        Ok(Self { fragments })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkFile {
    Wrapped { chunks: Vec<Fragment> },
    Bare(Vec<Fragment>),
}

/// Loads fragments produced by the upstream chunker.
///
/// Accepts either `{"chunks": [...], "metadata": {...}}` or a bare array of
/// `{fragment_id|chunk_id, text, metadata}` records.
pub fn load_fragments_json(path: &Path) -> Result<Vec<Fragment>, RagError> {
    let contents = fs::read_to_string(path)?;
    let parsed: ChunkFile = serde_json::from_str(&contents).map_err(|e| {
        RagError::InvalidInput(format!("{} is not a chunk file: {e}", path.display()))
    })?;
    let fragments = match parsed {
        ChunkFile::Wrapped { chunks } => chunks,
        ChunkFile::Bare(chunks) => chunks,
    };
    tracing::info!("Loaded {} fragments from {}", fragments.len(), path.display());
    Ok(fragments)
}
