//! Splitting a collection into shards and putting it back together.
//!
//! A collection is serialized to compact JSON, cut into at most `shard_count`
//! equal-length character slices, and each slice is sealed independently.
//! Reassembly trusts only the `index` carried by each chunk, never the order
//! chunks arrive in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use tracing::warn;

use crate::crypto::{checksum_hex, CipherCodec};
use crate::error::{CipherError, StoreError, StoreResult};

/// One plaintext slice before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainChunk {
    pub index: u32,
    pub text: String,
}

/// The on-disk form of a chunk file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredChunk {
    pub index: u32,
    /// Cipher token of the slice text.
    pub data: String,
    /// MD5 hex of the decrypted slice text.
    pub checksum: String,
}

pub fn split<T: Serialize + ?Sized>(
    value: &T,
    shard_count: NonZeroUsize,
) -> StoreResult<Vec<PlainChunk>> {
    let text =
        serde_json::to_string(value).map_err(|e| StoreError::Malformed(e.to_string()))?;
    Ok(split_text(&text, shard_count))
}

pub fn split_text(text: &str, shard_count: NonZeroUsize) -> Vec<PlainChunk> {
    let chars: Vec<char> = text.chars().collect();
    let shard_count = shard_count.get();
    let slice_len = chars.len().div_ceil(shard_count);
    if slice_len == 0 {
        return Vec::new();
    }
    chars
        .chunks(slice_len)
        .take(shard_count)
        .enumerate()
        .map(|(index, slice)| PlainChunk {
            index: index as u32,
            text: slice.iter().collect(),
        })
        .collect()
}

pub fn seal(chunk: &PlainChunk, codec: &CipherCodec) -> Result<StoredChunk, CipherError> {
    Ok(StoredChunk {
        index: chunk.index,
        data: codec.encrypt(&chunk.text)?,
        checksum: checksum_hex(&chunk.text),
    })
}

/// Decrypt and verify every chunk, then parse the concatenation.
///
/// Fails on the first chunk that does not decrypt or whose checksum does not
/// match; nothing partial is ever returned.
pub fn reassemble(mut chunks: Vec<StoredChunk>, codec: &CipherCodec) -> StoreResult<Value> {
    if chunks.is_empty() {
        return Err(StoreError::Malformed("collection has no chunks".into()));
    }
    chunks.sort_by_key(|c| c.index);

    let mut seen = BTreeSet::new();
    let mut text = String::new();
    for chunk in &chunks {
        if !seen.insert(chunk.index) {
            return Err(StoreError::IntegrityMismatch {
                index: chunk.index,
                reason: "duplicate chunk index".into(),
            });
        }
        let plain = codec.decrypt(&chunk.data).map_err(|e| {
            warn!(index = chunk.index, "failed to decrypt chunk");
            StoreError::decryption(format!("chunk {}", chunk.index), e)
        })?;
        let actual = checksum_hex(&plain);
        if actual != chunk.checksum {
            warn!(index = chunk.index, "checksum mismatch");
            return Err(StoreError::IntegrityMismatch {
                index: chunk.index,
                reason: format!("expected checksum {}, got {}", chunk.checksum, actual),
            });
        }
        text.push_str(&plain);
    }

    serde_json::from_str(&text).map_err(|e| {
        warn!(error = %e, "reassembled collection does not parse");
        StoreError::Malformed(e.to_string())
    })
}
