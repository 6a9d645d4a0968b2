//! Error taxonomy surfaced by every component.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PatchError>;

#[derive(Debug, Error)]
pub enum PatchError {
    /// Missing or malformed CLI arguments; override JSON unreadable or not
    /// a JSON object.
    #[error("input-error: {0}")]
    Input(String),

    /// Target file absent or unreadable.
    #[error("target-missing: {0}")]
    TargetMissing(String),

    /// No standard Zstandard frame found in the target.
    #[error("no-candidates: {0}")]
    NoCandidates(String),

    /// No decoded candidate meets the locale signature threshold.
    #[error("no-match: {0}")]
    NoMatch(String),

    /// Recompressed bytes do not fit the original frame length at any
    /// attempted compression level.
    #[error("capacity-exceeded: smallest recompression is {smallest} bytes against a capacity of {capacity}")]
    CapacityExceeded { smallest: usize, capacity: usize },

    /// Non-zero slack below the 8-byte skippable-frame minimum.
    #[error("padding-too-small: {slack} byte(s) of slack cannot hold an 8-byte skippable frame header")]
    PaddingTooSmall { slack: usize },

    /// File mutated but verification failed; the backup has been restored.
    #[error("post-write-validation: {0}")]
    PostWriteValidation(String),

    #[error("io-error: {0}")]
    Io(#[from] std::io::Error),
}

impl PatchError {
    /// Stable taxonomy tag, independent of message wording.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchError::Input(_) => "input-error",
            PatchError::TargetMissing(_) => "target-missing",
            PatchError::NoCandidates(_) => "no-candidates",
            PatchError::NoMatch(_) => "no-match",
            PatchError::CapacityExceeded { .. } => "capacity-exceeded",
            PatchError::PaddingTooSmall { .. } => "padding-too-small",
            PatchError::PostWriteValidation(_) => "post-write-validation",
            PatchError::Io(_) => "io-error",
        }
    }
}
