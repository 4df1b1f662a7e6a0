use crate::transaction::TransactionState;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Creating a temporary file failed for a reason other than a name collision.
    #[error("Failed to create temporary file in '{}': {source}", dir.display())]
    TempFile {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Gave up creating a temporary file in '{}' after {attempts} name collisions", dir.display())]
    TempNameExhausted { dir: PathBuf, attempts: u32 },

    /// Installing a temporary file at its destination failed.
    #[error("Failed to install result document '{}': {source}", destination.display())]
    Install {
        destination: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `complete()` failed after some documents had already been installed.
    #[error("Commit failed at '{}' after {committed} of {total} result documents: {source}", destination.display())]
    PartialCommit {
        committed: usize,
        total: usize,
        /// Destination whose install failed.
        destination: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("Transaction is {state}; no further operations are allowed")]
    Closed { state: TransactionState },

    #[error("Update aborted: {0}")]
    Aborted(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable code used in JSON events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::TempFile { .. } => "temp_file",
            Error::TempNameExhausted { .. } => "temp_name_exhausted",
            Error::Install { .. } => "install",
            Error::PartialCommit { .. } => "partial_commit",
            Error::Closed { .. } => "closed",
            Error::Aborted(_) => "aborted",
            Error::Validation(_) => "validation",
            Error::Json(_) => "json",
        }
    }
}
