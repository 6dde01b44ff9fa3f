//! Encrypted, sharded collection store.
//!
//! Each collection is serialized, split into chunks, and every chunk is
//! encrypted into its own randomly named `.dat` file. An encrypted manifest at
//! `.{collection}.manifest` maps chunk index to filename.
//!
//! Saves use a safe-replace protocol: the new chunk files are written first,
//! the new manifest is atomically renamed into place, and only then are the
//! chunk files of the previous generation removed. A crash at any point leaves
//! one complete generation reachable.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

use crate::backend::{LocalDir, StorageBackend};
use crate::chunk::{self, StoredChunk};
use crate::crypto::CipherCodec;
use crate::error::{CipherError, StoreError, StoreResult};
use crate::manifest::{generate_chunk_filename, manifest_filename, Manifest};
use crate::settings::StoreConfig;

pub struct CollectionStore<B: StorageBackend = LocalDir> {
    backend: B,
    codec: CipherCodec,
    shard_count: NonZeroUsize,
}

impl CollectionStore<LocalDir> {
    /// Open the store described by `config`, creating its directory if needed.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let backend = LocalDir::open(&config.storage_dir)
            .map_err(|e| StoreError::io(config.storage_dir.display().to_string(), e))?;
        if config.uses_default_secret() {
            warn!(dir = %config.storage_dir.display(), "collection store opened with the default secret");
        }
        Ok(Self::with_backend(
            backend,
            config.secret(),
            config.shard_count,
        ))
    }
}

impl<B: StorageBackend> CollectionStore<B> {
    pub fn with_backend(backend: B, secret: &str, shard_count: NonZeroUsize) -> Self {
        Self {
            backend,
            codec: CipherCodec::from_secret(secret),
            shard_count,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn shard_count(&self) -> NonZeroUsize {
        self.shard_count
    }

    // ── Save ────────────────────────────────────────────────────────────────

    /// Replace the contents of collection `name` with `data`.
    ///
    /// On error the previous generation stays loadable; chunk files already
    /// written for the failed generation are left unreferenced.
    pub fn save<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> StoreResult<()> {
        let result = self.save_inner(name, data);
        log_failure("save", name, &result);
        result
    }

    fn save_inner<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> StoreResult<()> {
        validate_name(name)?;
        let previous = match self.read_manifest(name) {
            Ok(previous) => previous,
            Err(err @ (StoreError::DecryptionFailed { .. } | StoreError::Malformed(_))) => {
                warn!(
                    collection = name,
                    error = %err,
                    "previous manifest unreadable; its chunk files will be orphaned"
                );
                None
            }
            Err(err) => return Err(err),
        };

        let chunks = chunk::split(data, self.shard_count)?;
        let mut manifest = Manifest::new();
        for plain in &chunks {
            let sealed = chunk::seal(plain, &self.codec)?;
            let bytes = serde_json::to_vec(&sealed)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            let filename = generate_chunk_filename();
            if let Err(err) = self.write(&filename, &bytes) {
                warn!(
                    collection = name,
                    orphaned = manifest.len(),
                    "save aborted while writing chunks"
                );
                return Err(err);
            }
            manifest.insert(plain.index, filename);
        }

        let token = manifest.seal(&self.codec)?;
        if let Err(err) = self.write(&manifest_filename(name), token.as_bytes()) {
            warn!(
                collection = name,
                orphaned = manifest.len(),
                "save aborted while committing manifest"
            );
            return Err(err);
        }

        if let Some(previous) = previous {
            self.remove_stale_chunks(name, &previous, &manifest);
        }
        debug!(collection = name, chunks = manifest.len(), "collection saved");
        Ok(())
    }

    /// Best effort: the new generation is already committed, so a chunk that
    /// cannot be removed is only wasted space.
    fn remove_stale_chunks(&self, name: &str, previous: &Manifest, current: &Manifest) {
        for filename in previous.filenames() {
            if current.contains_file(filename) {
                continue;
            }
            if let Err(e) = self.backend.remove(filename) {
                warn!(
                    collection = name,
                    file = %self.backend.describe(filename),
                    error = %e,
                    "cannot remove stale chunk"
                );
            }
        }
    }

    // ── Load ────────────────────────────────────────────────────────────────

    /// Load collection `name` and deserialize it into `T`.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> StoreResult<T> {
        let result = self.load_value_inner(name).and_then(|value| {
            serde_json::from_value(value).map_err(|e| StoreError::Malformed(e.to_string()))
        });
        log_failure("load", name, &result);
        result
    }

    /// Load collection `name` as untyped JSON.
    pub fn load_value(&self, name: &str) -> StoreResult<Value> {
        let result = self.load_value_inner(name);
        log_failure("load", name, &result);
        result
    }

    /// Like [`load`](Self::load), but a collection that was never saved
    /// yields `T::default()`. Every other failure is still an error.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> StoreResult<T> {
        match self.load(name) {
            Err(StoreError::MissingManifest(_)) => Ok(T::default()),
            other => other,
        }
    }

    fn load_value_inner(&self, name: &str) -> StoreResult<Value> {
        validate_name(name)?;
        let manifest = self
            .read_manifest(name)?
            .ok_or_else(|| StoreError::MissingManifest(name.to_string()))?;

        let mut chunks = Vec::with_capacity(manifest.len());
        for (index, filename) in manifest.entries() {
            let bytes = self
                .read(filename)?
                .ok_or_else(|| StoreError::MissingChunk(self.backend.describe(filename)))?;
            let stored: StoredChunk = serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Malformed(format!("chunk file {filename}: {e}"))
            })?;
            if stored.index != index {
                return Err(StoreError::IntegrityMismatch {
                    index,
                    reason: format!("{filename} holds chunk {}", stored.index),
                });
            }
            chunks.push(stored);
        }
        chunk::reassemble(chunks, &self.codec)
    }

    // ── Delete ──────────────────────────────────────────────────────────────

    /// Remove collection `name`: every chunk file its manifest references,
    /// then the manifest. Deleting a collection that does not exist succeeds.
    pub fn delete_collection(&self, name: &str) -> StoreResult<()> {
        let result = self.delete_inner(name);
        log_failure("delete", name, &result);
        result
    }

    fn delete_inner(&self, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        let manifest_name = manifest_filename(name);
        match self.read_manifest(name) {
            Ok(Some(manifest)) => {
                for filename in manifest.filenames() {
                    self.remove(filename)?;
                }
            }
            Ok(None) => return Ok(()),
            Err(err @ (StoreError::DecryptionFailed { .. } | StoreError::Malformed(_))) => {
                warn!(
                    collection = name,
                    error = %err,
                    "manifest unreadable; its chunk files are orphaned"
                );
            }
            Err(err) => return Err(err),
        }
        self.remove(&manifest_name)?;
        debug!(collection = name, "collection deleted");
        Ok(())
    }

    /// Remove every file in the storage directory, whatever it belongs to.
    pub fn clear_all(&self) -> StoreResult<()> {
        let removed = self.backend.remove_all().map_err(|e| {
            warn!(error = %e, "clear all failed");
            StoreError::io(self.backend.describe(""), e)
        })?;
        info!(removed, "storage cleared");
        Ok(())
    }

    pub fn exists(&self, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        let manifest_name = manifest_filename(name);
        self.backend
            .exists(&manifest_name)
            .map_err(|e| StoreError::io(self.backend.describe(&manifest_name), e))
    }

    // ── Private helpers ─────────────────────────────────────────────────────

    fn read_manifest(&self, name: &str) -> StoreResult<Option<Manifest>> {
        let Some(bytes) = self.read(&manifest_filename(name))? else {
            return Ok(None);
        };
        let token = String::from_utf8(bytes).map_err(|_| {
            StoreError::decryption(format!("manifest of {name}"), CipherError::MalformedToken)
        })?;
        Manifest::open(token.trim(), &self.codec, name).map(Some)
    }

    fn read(&self, filename: &str) -> StoreResult<Option<Vec<u8>>> {
        self.backend
            .read(filename)
            .map_err(|e| StoreError::io(self.backend.describe(filename), e))
    }

    fn write(&self, filename: &str, bytes: &[u8]) -> StoreResult<()> {
        self.backend
            .write_atomic(filename, bytes)
            .map_err(|e| StoreError::io(self.backend.describe(filename), e))
    }

    fn remove(&self, filename: &str) -> StoreResult<()> {
        self.backend
            .remove(filename)
            .map(|_| ())
            .map_err(|e| StoreError::io(self.backend.describe(filename), e))
    }
}

/// Collection names become part of a filename and must stay inside the
/// storage directory.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollectionName(name.to_string()))
    }
}

fn log_failure<T>(op: &str, name: &str, result: &StoreResult<T>) {
    match result {
        Ok(_) => {}
        Err(err) if err.is_missing() => debug!(op, collection = name, "collection not found"),
        Err(err) => warn!(op, collection = name, error = %err, "collection operation failed"),
    }
}
