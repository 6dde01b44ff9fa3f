//! Launcher data layer: an encrypted, sharded collection store.
//!
//! ```text
//! save("games", data)
//!     ↓ serde_json (compact)
//! Chunker ── N slices ──► CipherCodec (AES-256-CBC) ──► {hex}.dat × N
//!                                                     └► .games.manifest (encrypted)
//! ```

pub mod backend;
pub mod chunk;
pub mod crypto;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod settings;
pub mod store;

pub use backend::{LocalDir, MemoryBackend, StorageBackend};
pub use crypto::CipherCodec;
pub use error::{CipherError, StoreError, StoreResult};
pub use manifest::Manifest;
pub use settings::StoreConfig;
pub use store::CollectionStore;
