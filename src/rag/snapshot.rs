//! Snapshot persistence for a [`FragmentIndex`].
//!
//! A snapshot directory holds four artifacts:
//! - `vectors.bin`: opaque vector blob (see [`FlatIndex::to_bytes`])
//! - `fragments.jsonl`: one fragment record per line
//! - `id_map.json`: forward/reverse identity map and next free position
//! - `embedding_meta.json`: provenance metadata
//!
//! Every save stamps one fresh snapshot id into the blob, the identity map
//! and the provenance file. Files are written to temporary paths, fsynced and
//! renamed with the provenance file last, so an interrupted save leaves ids
//! that disagree and the next load fails instead of mixing two states.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::fragment::FragmentStore;
use super::identity::{IdentityMap, IdentityRecord};
use super::index::FragmentIndex;
use super::vector_index::{FlatIndex, Metric};
use crate::core::config::EmbeddingConfig;
use crate::core::errors::RagError;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const FRAGMENTS_FILE: &str = "fragments.jsonl";
pub const ID_MAP_FILE: &str = "id_map.json";
pub const PROVENANCE_FILE: &str = "embedding_meta.json";
const LOCK_FILE: &str = ".snapshot.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub snapshot_id: String,
    pub model_name: String,
    pub dimension: usize,
    pub normalize: bool,
    pub metric: Metric,
    pub total_vectors: usize,
    pub created_at: DateTime<Utc>,
    pub api_base_url: String,
    /// Hex SHA-256 of the vector blob.
    pub vectors_sha256: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotWarning {
    /// The snapshot was embedded with a different model than the one
    /// configured now; query vectors may not be comparable.
    ModelMismatch { snapshot_model: String, configured_model: String },
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub provenance: Provenance,
    pub warnings: Vec<SnapshotWarning>,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.join(PROVENANCE_FILE).exists()
    }

    pub fn save(
        &self,
        index: &FragmentIndex,
        embedding: &EmbeddingConfig,
    ) -> Result<Provenance, RagError> {
        if !index.is_initialized() {
            return Err(RagError::NotInitialized);
        }
        index.check_consistency()?;

        fs::create_dir_all(&self.dir)?;
        let _lock = DirLock::acquire(&self.dir)?;

        let snapshot_id = Uuid::new_v4();
        let blob = index.vectors().to_bytes(snapshot_id)?;
        let provenance = Provenance {
            snapshot_id: snapshot_id.to_string(),
            model_name: embedding.model_name.clone(),
            dimension: index.dimension().unwrap_or_default(),
            normalize: embedding.normalize,
            metric: index.metric(),
            total_vectors: index.len(),
            created_at: Utc::now(),
            api_base_url: embedding.api_base_url.clone(),
            vectors_sha256: hex::encode(Sha256::digest(&blob)),
        };

        let fragments = index.fragments().to_jsonl()?;
        let record = index.identity().to_record(&provenance.snapshot_id);
        let id_map = serde_json::to_vec_pretty(&record)?;
        let meta = serde_json::to_vec_pretty(&provenance)?;

        // Provenance goes last: it is the commit marker.
        let staged = [
            (VECTORS_FILE, blob),
            (FRAGMENTS_FILE, fragments.into_bytes()),
            (ID_MAP_FILE, id_map),
            (PROVENANCE_FILE, meta),
        ];
        let mut temps = Vec::with_capacity(staged.len());
        for (name, bytes) in &staged {
            temps.push((self.write_temp(name, bytes)?, self.dir.join(name)));
        }
        sync_dir(&self.dir)?;
        for (temp, target) in &temps {
            fs::rename(temp, target)?;
        }
        sync_dir(&self.dir)?;

        tracing::info!(
            "Saved snapshot {} ({} vectors) to {}",
            provenance.snapshot_id,
            provenance.total_vectors,
            self.dir.display()
        );
        Ok(provenance)
    }

    /// Restores the snapshot and re-validates it. `configured_model` is only
    /// compared against provenance; a mismatch is reported, not rejected.
    pub fn load(&self, configured_model: &str) -> Result<(FragmentIndex, LoadReport), RagError> {
        if !self.exists() {
            return Err(RagError::NotFound(format!(
                "no snapshot in {}",
                self.dir.display()
            )));
        }
        let _lock = DirLock::acquire(&self.dir)?;

        let provenance: Provenance = serde_json::from_slice(&self.read(PROVENANCE_FILE)?)
            .map_err(|e| RagError::integrity(format!("{PROVENANCE_FILE}: {e}")))?;

        let blob = self.read(VECTORS_FILE)?;
        let digest = hex::encode(Sha256::digest(&blob));
        if digest != provenance.vectors_sha256 {
            return Err(RagError::integrity("vector blob checksum does not match provenance"));
        }
        let (vectors, blob_snapshot) = FlatIndex::from_bytes(&blob)?;

        let contents = String::from_utf8(self.read(FRAGMENTS_FILE)?)
            .map_err(|e| RagError::integrity(format!("{FRAGMENTS_FILE}: {e}")))?;
        let fragments = FragmentStore::from_jsonl(&contents)?;

        let record: IdentityRecord = serde_json::from_slice(&self.read(ID_MAP_FILE)?)
            .map_err(|e| RagError::integrity(format!("{ID_MAP_FILE}: {e}")))?;
        let identity = IdentityMap::from_record(&record)?;

        let stamps = [blob_snapshot.to_string(), record.snapshot_id.clone()];
        if stamps.iter().any(|s| *s != provenance.snapshot_id) {
            return Err(RagError::integrity(format!(
                "artifacts come from different saves (provenance {}, vectors {}, id map {})",
                provenance.snapshot_id, stamps[0], stamps[1]
            )));
        }
        if provenance.total_vectors != vectors.len()
            || Some(provenance.dimension) != vectors.dimension()
            || provenance.metric != vectors.metric()
        {
            return Err(RagError::integrity(format!(
                "provenance describes {} x {} ({:?}) but the blob holds {} x {:?} ({:?})",
                provenance.total_vectors,
                provenance.dimension,
                provenance.metric,
                vectors.len(),
                vectors.dimension(),
                vectors.metric()
            )));
        }

        let index = FragmentIndex::from_parts(fragments, identity, vectors)?;

        let mut warnings = Vec::new();
        if provenance.model_name != configured_model {
            tracing::warn!(
                "Snapshot was embedded with {} but {} is configured; results may be inconsistent",
                provenance.model_name,
                configured_model
            );
            warnings.push(SnapshotWarning::ModelMismatch {
                snapshot_model: provenance.model_name.clone(),
                configured_model: configured_model.to_string(),
            });
        }

        tracing::info!(
            "Loaded snapshot {} ({} vectors, model {}) from {}",
            provenance.snapshot_id,
            index.len(),
            provenance.model_name,
            self.dir.display()
        );
        Ok((index, LoadReport { provenance, warnings }))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, RagError> {
        let path = self.dir.join(name);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RagError::integrity(format!("snapshot is missing {}", path.display()))
            }
            _ => RagError::Io(e),
        })
    }

    fn write_temp(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, RagError> {
        let temp = self.dir.join(format!("{name}.tmp"));
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(temp)
    }
}

/// Exclusive advisory lock on the snapshot directory, released on drop.
struct DirLock {
    file: File,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self, RagError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> Result<(), RagError> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> Result<(), RagError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::fragment::Fragment;
    use crate::rag::testing::char_bag;
    use crate::vector_math::normalize_in_place;

    fn sample_index(ids: &[&str]) -> FragmentIndex {
        let fragments: Vec<Fragment> = ids
            .iter()
            .map(|id| Fragment::new(*id, format!("内容 {id}")).with_metadata("title", *id))
            .collect();
        let vectors = fragments
            .iter()
            .map(|f| {
                let mut v = char_bag(&f.text);
                normalize_in_place(&mut v);
                v
            })
            .collect();
        let mut index = FragmentIndex::new(Metric::InnerProduct);
        index.build(fragments, vectors).unwrap();
        index
    }

    fn embedding_config(model: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: model.to_string(),
            dimension: crate::rag::testing::FAKE_DIM,
            ..Default::default()
        }
    }

    #[test]
    fn save_then_load_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("snap"));
        let index = sample_index(&["a", "b", "c"]);

        let saved = store.save(&index, &embedding_config("m1")).unwrap();
        assert_eq!(saved.total_vectors, 3);
        for name in [VECTORS_FILE, FRAGMENTS_FILE, ID_MAP_FILE, PROVENANCE_FILE] {
            assert!(store.dir().join(name).exists(), "{name} missing");
            assert!(!store.dir().join(format!("{name}.tmp")).exists());
        }

        let (loaded, report) = store.load("m1").unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(report.provenance, saved);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.identity().next_free_position(), 3);
        assert_eq!(loaded.fragment("b").unwrap().title(), Some("b"));
        assert_eq!(loaded.vectors().vector(2), index.vectors().vector(2));
    }

    #[test]
    fn model_mismatch_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_index(&["a"]), &embedding_config("old-model")).unwrap();

        let (loaded, report) = store.load("new-model").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            report.warnings,
            vec![SnapshotWarning::ModelMismatch {
                snapshot_model: "old-model".to_string(),
                configured_model: "new-model".to_string(),
            }]
        );
    }

    #[test]
    fn extra_fragment_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_index(&["a", "b"]), &embedding_config("m")).unwrap();

        let path = dir.path().join(FRAGMENTS_FILE);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{\"fragment_id\":\"c\",\"text\":\"extra\",\"metadata\":{}}\n");
        fs::write(&path, contents).unwrap();

        assert!(matches!(store.load("m"), Err(RagError::Integrity(_))));
    }

    #[test]
    fn artifacts_from_different_saves_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_index(&["a", "b"]), &embedding_config("m")).unwrap();
        let old_id_map = fs::read(dir.path().join(ID_MAP_FILE)).unwrap();

        store.save(&sample_index(&["a", "b"]), &embedding_config("m")).unwrap();
        fs::write(dir.path().join(ID_MAP_FILE), old_id_map).unwrap();

        let err = store.load("m").unwrap_err();
        assert!(matches!(err, RagError::Integrity(msg) if msg.contains("different saves")));
    }

    #[test]
    fn interrupted_save_does_not_pass_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_index(&["a"]), &embedding_config("m")).unwrap();

        // Simulate a crash after the new vectors were committed but before provenance.
        let mut bigger = sample_index(&["a"]);
        let extra = vec![Fragment::new("b", "内容 b")];
        let mut v = char_bag("内容 b");
        normalize_in_place(&mut v);
        bigger.add(extra, vec![v]).unwrap();
        let blob = bigger.vectors().to_bytes(Uuid::new_v4()).unwrap();
        fs::write(dir.path().join(VECTORS_FILE), blob).unwrap();

        assert!(matches!(store.load("m"), Err(RagError::Integrity(_))));
    }

    #[test]
    fn corrupted_blob_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.save(&sample_index(&["a"]), &embedding_config("m")).unwrap();

        let path = dir.path().join(VECTORS_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = store.load("m").unwrap_err();
        assert!(matches!(err, RagError::Integrity(msg) if msg.contains("checksum")));
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("absent"));
        assert!(matches!(store.load("m"), Err(RagError::NotFound(_))));
    }

    #[test]
    fn saving_an_unbuilt_index_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let index = FragmentIndex::new(Metric::InnerProduct);
        assert!(matches!(
            store.save(&index, &embedding_config("m")),
            Err(RagError::NotInitialized)
        ));
    }
}
