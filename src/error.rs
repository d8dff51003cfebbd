//! Error types for sextant

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Unknown codec: {0}")]
    CodecVersion(String),

    #[error("Values out of order in {}", .0.display())]
    Unsorted(PathBuf),
}

impl Error {
    /// Attach the offending path to a raw IO failure.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
