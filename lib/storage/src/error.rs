use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures inside the cache. These are logged and absorbed at the cache
/// boundary; callers only ever observe a miss or a no-op.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache directory '{}' could not be created: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache store '{}' could not be opened: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("Cache store '{}' failed its integrity check: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Cache writer lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("Cache store error: {0:#}")]
    Store(#[from] anyhow::Error),
}
