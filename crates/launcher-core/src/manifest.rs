//! Per-collection index of chunk files.
//!
//! The manifest maps chunk index to an opaque random filename. It is stored
//! encrypted at `.{collection}.manifest`, so the chunk files of a collection
//! cannot be enumerated without the key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{random_hex, CipherCodec};
use crate::error::{StoreError, StoreResult};

pub const MANIFEST_EXTENSION: &str = "manifest";
pub const CHUNK_EXTENSION: &str = "dat";
const CHUNK_NAME_BYTES: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Manifest {
    chunks: BTreeMap<u32, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u32, filename: String) {
        self.chunks.insert(index, filename);
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.chunks.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Entries in ascending index order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.chunks.iter().map(|(i, f)| (*i, f.as_str()))
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.chunks.values().map(String::as_str)
    }

    pub fn contains_file(&self, filename: &str) -> bool {
        self.chunks.values().any(|f| f == filename)
    }

    pub fn seal(&self, codec: &CipherCodec) -> StoreResult<String> {
        let json =
            serde_json::to_string(self).map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(codec.encrypt(&json)?)
    }

    pub fn open(token: &str, codec: &CipherCodec, collection: &str) -> StoreResult<Self> {
        let json = codec
            .decrypt(token)
            .map_err(|e| StoreError::decryption(format!("manifest of {collection}"), e))?;
        let manifest: Manifest =
            serde_json::from_str(&json).map_err(|e| StoreError::Malformed(e.to_string()))?;
        if let Some(bad) = manifest.filenames().find(|f| !is_chunk_filename(f)) {
            return Err(StoreError::Malformed(format!(
                "manifest of {collection} references invalid file {bad:?}"
            )));
        }
        Ok(manifest)
    }
}

pub fn manifest_filename(collection: &str) -> String {
    format!(".{collection}.{MANIFEST_EXTENSION}")
}

/// Fresh random chunk filename: 16 random bytes hex + `.dat`.
pub fn generate_chunk_filename() -> String {
    format!("{}.{CHUNK_EXTENSION}", random_hex(CHUNK_NAME_BYTES))
}

/// Exactly the shape [`generate_chunk_filename`] produces: 32 hex chars and
/// `.dat`. Manifests, staging files and paths never qualify.
fn is_chunk_filename(name: &str) -> bool {
    match name.strip_suffix(CHUNK_EXTENSION).and_then(|s| s.strip_suffix('.')) {
        Some(stem) => {
            stem.len() == CHUNK_NAME_BYTES * 2 && stem.bytes().all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string_keyed_object() {
        let mut manifest = Manifest::new();
        manifest.insert(0, "aa.dat".into());
        manifest.insert(10, "bb.dat".into());
        manifest.insert(2, "cc.dat".into());
        let json = serde_json::to_string(&manifest).unwrap();
        assert_eq!(json, r#"{"0":"aa.dat","2":"cc.dat","10":"bb.dat"}"#);
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn seal_and_open() {
        let codec = CipherCodec::from_secret("manifest-tests");
        let mut manifest = Manifest::new();
        manifest.insert(0, generate_chunk_filename());
        manifest.insert(1, generate_chunk_filename());
        let token = manifest.seal(&codec).unwrap();
        assert!(!token.contains(".dat"));
        let opened = Manifest::open(&token, &codec, "users").unwrap();
        assert_eq!(opened, manifest);
    }

    #[test]
    fn open_with_wrong_key_is_decryption_failure() {
        let mut manifest = Manifest::new();
        manifest.insert(0, generate_chunk_filename());
        let token = manifest
            .seal(&CipherCodec::from_secret("right"))
            .unwrap();
        let err = Manifest::open(&token, &CipherCodec::from_secret("wrong"), "users");
        assert!(err.is_err());
    }

    #[test]
    fn open_rejects_path_like_filenames() {
        let codec = CipherCodec::from_secret("manifest-tests");
        let token = codec.encrypt(r#"{"0":"../outside.dat"}"#).unwrap();
        assert!(matches!(
            Manifest::open(&token, &codec, "users"),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn open_rejects_names_that_are_not_chunk_files() {
        let codec = CipherCodec::from_secret("manifest-tests");
        for bad in [
            ".users.manifest",
            ".staging-abc123",
            "short.dat",
            "00112233445566778899aabbccddeeff.txt",
            "00112233445566778899aabbccddeeff",
            "0011223344556677889gaabbccddeeff.dat",
        ] {
            let token = codec
                .encrypt(&serde_json::json!({ "0": bad }).to_string())
                .unwrap();
            assert!(
                matches!(
                    Manifest::open(&token, &codec, "users"),
                    Err(StoreError::Malformed(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn open_accepts_existing_chunk_names() {
        let codec = CipherCodec::from_secret("manifest-tests");
        let token = codec
            .encrypt(r#"{"0":"00112233445566778899aabbccddeeff.dat"}"#)
            .unwrap();
        let manifest = Manifest::open(&token, &codec, "users").unwrap();
        assert_eq!(manifest.get(0), Some("00112233445566778899aabbccddeeff.dat"));
    }

    #[test]
    fn chunk_filenames_are_random_hex() {
        let a = generate_chunk_filename();
        let b = generate_chunk_filename();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32 + ".dat".len());
        assert!(a.trim_end_matches(".dat").chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn manifest_path_is_hidden_and_name_derived() {
        assert_eq!(manifest_filename("games"), ".games.manifest");
    }
}
