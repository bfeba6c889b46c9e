use std::path::PathBuf;
use thiserror::Error;

/// Failures of the beat-sync engine. Every variant aborts the whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("audio could not be decoded: {0}")]
    Decode(String),

    #[error("no images supplied")]
    EmptyPool,

    #[error("no beats or onsets detected in audio")]
    NoBeatsDetected,

    #[error("render failed: {0}")]
    Render(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<symphonia::core::errors::Error> for SyncError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}
