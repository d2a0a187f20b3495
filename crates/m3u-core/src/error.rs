use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::loader::LoadError;

/// Failure persisting one of the JSON stores (blacklist, registry, cache).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("No playlist file associated with the editor")]
    NoPlaylist,
    #[error("Channel index {index} out of range (playlist has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
