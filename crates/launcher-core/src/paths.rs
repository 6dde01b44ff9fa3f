//! Where the store lives by default.
//!
//! Collections go in a hidden `.data` directory under the platform data dir,
//! kept apart from anything else the launcher writes there so `clear_all`
//! only ever wipes store files.

use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "ayato";
pub const APP_NAME: &str = "launcher";

/// Directory name the collection store lives in, under the data dir.
pub const STORE_DIR_NAME: &str = ".data";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn store_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(STORE_DIR_NAME))
}
