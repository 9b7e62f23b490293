use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `discdec` crate.
#[derive(Error, Debug)]
pub enum DiscError {
    /// An I/O error occurred, typically while reading or writing an image file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The source yielded fewer bytes than a full read required. Carries the
    /// requested and obtained byte counts for diagnosis.
    #[error("short read: requested {requested} bytes but only {obtained} were available")]
    ShortRead { requested: usize, obtained: usize },

    /// The region table in the image header is malformed.
    #[error("malformed region header: {0}")]
    Format(String),

    /// A title key string had the wrong length or contained non-hex characters.
    #[error("invalid key: {0}")]
    KeyFormat(String),

    /// The running sector cursor diverged from a region's declared start
    /// during the region walk.
    #[error("region starts at sector {declared} but the walk cursor is at sector {cursor}")]
    Consistency { declared: u64, cursor: u64 },

    /// An error from the cipher layer during sector decryption.
    #[error("cipher error: {0}")]
    Crypto(String),

    /// An error during deserialization of the title database.
    #[error("title database error: {0}")]
    Database(#[from] serde_json::Error),

    /// The image digest has no entry in the title database.
    #[error("no matching game found")]
    LookupMiss,

    /// Cooperative cancellation was observed at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,

    /// A wrapper for any other error that doesn't fit the specific variants.
    #[error("an unexpected error occurred: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl DiscError {
    /// Attach a path to an I/O error.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DiscError::Io { source, path: path.into() }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for DiscError {
    fn from(err: std::io::Error) -> Self {
        DiscError::Io { source: err, path: PathBuf::new() }
    }
}

/// Convenient crate-wide result type.
pub type Result<T> = std::result::Result<T, DiscError>;
