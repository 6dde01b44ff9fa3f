//! Storage backends: the flat directory the store keeps its files in.
//!
//! The store only ever addresses bare filenames; a backend maps them onto
//! real storage. Every write is atomic: readers see either the old content or
//! the new content, never a torn file.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of in-flight files; anything left with it is debris from a crash.
pub const STAGING_PREFIX: &str = ".staging-";

pub trait StorageBackend {
    /// `Ok(None)` when the file does not exist.
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Write `bytes` under a staging name, then rename over `name`.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// `Ok(false)` when there was nothing to remove.
    fn remove(&self, name: &str) -> io::Result<bool>;

    fn exists(&self, name: &str) -> io::Result<bool>;

    /// Names of all regular files, in no particular order.
    fn list(&self) -> io::Result<Vec<String>>;

    /// Remove every regular file; returns how many were removed.
    fn remove_all(&self) -> io::Result<usize>;

    /// Human-readable location of `name`, for logs and errors.
    fn describe(&self, name: &str) -> String;
}

// ── Local directory ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocalDir {
    root: PathBuf,
}

impl LocalDir {
    /// Open (creating if needed) a storage directory and sweep staging
    /// files left by an interrupted write.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        restrict_dir_permissions(&root);
        cleanup_staging(&root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl StorageBackend for LocalDir {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let dest = self.path_of(name);
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.root)?;
        staged.write_all(bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(&dest).map_err(|e| e.error)?;
        fsync_dir(&self.root)
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        self.path_of(name).try_exists()
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn remove_all(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn describe(&self, name: &str) -> String {
        self.path_of(name).display().to_string()
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn cleanup_staging(root: &Path) {
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(STAGING_PREFIX) {
                warn!(path = %entry.path().display(), "removing orphaned staging file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

fn fsync_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let dir = fs::OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Shared in-memory backend. Clones see the same files, which lets tests keep
/// a handle for inspection and tampering while a store owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    writes_left: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more successful writes, then fail every write after that.
    pub fn fail_writes_after(&self, n: usize) {
        self.inner.lock().writes_left = Some(n);
    }

    pub fn heal(&self) {
        self.inner.lock().writes_left = None;
    }

    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.inner.lock().files.insert(name.to_string(), bytes);
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().files.len()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().files.get(name).cloned())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.inner.lock();
        if let Some(left) = state.writes_left.as_mut() {
            if *left == 0 {
                debug!(file = name, "injected write failure");
                return Err(io::Error::other("injected write failure"));
            }
            *left -= 1;
        }
        state.files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        Ok(self.inner.lock().files.remove(name).is_some())
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        Ok(self.inner.lock().files.contains_key(name))
    }

    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.inner.lock().files.keys().cloned().collect())
    }

    fn remove_all(&self) -> io::Result<usize> {
        let mut state = self.inner.lock();
        let removed = state.files.len();
        state.files.clear();
        Ok(removed)
    }

    fn describe(&self, name: &str) -> String {
        format!("memory:{name}")
    }
}
