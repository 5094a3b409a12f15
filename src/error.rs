use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by case operations. Failures of the wrapped external
/// applications are never represented here: those end up in the log file and
/// the run record, not in the caller's control flow.
#[derive(Debug, Error)]
pub enum Error {
    #[error("case already cloned: remove case directory {0} prior to cloning")]
    DestinationExists(PathBuf),

    #[error("no directory to clone: {0}")]
    NotADirectory(PathBuf),

    #[error("no processor directories to clone: {0} does not appear to be a parallel case")]
    NotParallel(PathBuf),

    #[error("no 0.orig/ to restore in {0}")]
    NoInitialConditions(PathBuf),

    #[error("{0} does not look like a case directory (no system/)")]
    NotACase(PathBuf),

    #[error("could not find image {0}")]
    ImageNotFound(PathBuf),

    #[error("error getting '{entry}' from '{dict}': {reason}")]
    Lookup {
        entry: String,
        dict: PathBuf,
        reason: String,
    },

    #[error("{0}")]
    Usage(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("run record: {0}")]
    Record(String),

    #[error("could not install signal handler: {0}")]
    Signal(#[source] io::Error),
}

impl Error {
    /// Attach the offending path to an I/O error.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn lookup(entry: &str, dict: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Lookup {
            entry: entry.to_string(),
            dict: dict.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}
