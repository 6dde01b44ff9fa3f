use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::warn;
use zeroize::Zeroizing;

use crate::paths::store_dir;

pub const ENV_SECRET: &str = "ENCRYPTION_KEY";
pub const ENV_DATA_DIR: &str = "LAUNCHER_DATA_DIR";
pub const ENV_SHARD_COUNT: &str = "LAUNCHER_SHARD_COUNT";

/// Public fallback secret. Data written under it has no confidentiality;
/// deployments must set `ENCRYPTION_KEY`.
pub const DEFAULT_SECRET: &str = "AyAtO-LaUnChEr-2024-SeCrEt!!";
pub const DEFAULT_SHARD_COUNT: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Clone)]
pub struct StoreConfig {
    pub storage_dir: PathBuf,
    pub shard_count: NonZeroUsize,
    secret: Zeroizing<String>,
}

impl StoreConfig {
    pub fn new(storage_dir: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            shard_count: DEFAULT_SHARD_COUNT,
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn with_shard_count(mut self, shard_count: NonZeroUsize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret.as_str() == DEFAULT_SECRET
    }

    /// Resolve from `ENCRYPTION_KEY`, `LAUNCHER_DATA_DIR` and
    /// `LAUNCHER_SHARD_COUNT`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        Self::resolve(None, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), but `storage_dir` wins over
    /// `LAUNCHER_DATA_DIR` and the platform default.
    pub fn from_env_in(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::resolve(Some(storage_dir.into()), |key| std::env::var(key).ok())
    }

    pub fn resolve(
        storage_dir: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let secret = match lookup(ENV_SECRET).filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                warn!(
                    "{ENV_SECRET} is not set; using the built-in default secret, \
                     which provides no confidentiality"
                );
                DEFAULT_SECRET.to_string()
            }
        };

        let storage_dir = match storage_dir {
            Some(dir) => dir,
            None => match lookup(ENV_DATA_DIR).filter(|s| !s.is_empty()) {
                Some(dir) => PathBuf::from(dir),
                None => store_dir()?,
            },
        };

        let shard_count = match lookup(ENV_SHARD_COUNT) {
            Some(raw) => parse_shard_count(&raw)
                .with_context(|| format!("invalid {ENV_SHARD_COUNT}"))?,
            None => DEFAULT_SHARD_COUNT,
        };

        Ok(Self {
            storage_dir,
            shard_count,
            secret: Zeroizing::new(secret),
        })
    }
}

pub fn parse_shard_count(raw: &str) -> Result<NonZeroUsize> {
    raw.trim()
        .parse::<NonZeroUsize>()
        .map_err(|_| anyhow!("shard count must be a positive integer, got {raw:?}"))
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("storage_dir", &self.storage_dir)
            .field("shard_count", &self.shard_count)
            .field("secret", &"<redacted>")
            .finish()
    }
}
