use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("token is not of the form <iv>:<ciphertext>")]
    MalformedToken,

    #[error("invalid initialization vector")]
    InvalidIv,

    #[error("decryption failed (wrong key or corrupted ciphertext)")]
    Decrypt,

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no manifest for collection {0}")]
    MissingManifest(String),

    #[error("chunk file missing: {0}")]
    MissingChunk(String),

    #[error("decryption failed for {context}: {source}")]
    DecryptionFailed {
        context: String,
        #[source]
        source: CipherError,
    },

    #[error("integrity mismatch for chunk {index}: {reason}")]
    IntegrityMismatch { index: u32, reason: String },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("invalid collection name {0:?}")]
    InvalidCollectionName(String),

    #[error("encryption failed: {0}")]
    Encryption(#[from] CipherError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decryption(context: impl Into<String>, source: CipherError) -> Self {
        StoreError::DecryptionFailed {
            context: context.into(),
            source,
        }
    }

    /// True for the "never saved" case, which callers usually treat as empty.
    pub fn is_missing(&self) -> bool {
        matches!(self, StoreError::MissingManifest(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
