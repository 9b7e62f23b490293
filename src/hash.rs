//! Streaming whole-file SHA-1 digests.
//!
//! The digest identifies a title: the lowercase hex string is the lookup key
//! into the title database. Files are streamed in large chunks so arbitrarily
//! big images hash in constant memory.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::common::CancelToken;
use crate::error::{DiscError, Result};
use crate::progress::{ProgressCallback, ProgressReporter};

/// Read size for digest chunks (64 MiB). Large enough to avoid per-read
/// overhead, small enough to bound memory.
const HASH_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Compute the SHA-1 digest of a whole file, rendered as a 40-character
/// lowercase hex string.
///
/// Progress is emitted as bytes processed over file length after each chunk;
/// cancellation is checked once per chunk boundary.
pub fn hash_file(
    path: &Path,
    cancel: &CancelToken,
    progress: Option<&ProgressCallback>,
) -> Result<String> {
    hash_file_chunked(path, HASH_CHUNK_SIZE, cancel, progress)
}

/// Same as [`hash_file`] with an explicit chunk size. The digest is
/// independent of the chunk size used to stream the file.
pub(crate) fn hash_file_chunked(
    path: &Path,
    chunk_size: usize,
    cancel: &CancelToken,
    progress: Option<&ProgressCallback>,
) -> Result<String> {
    let mut file = File::open(path).map_err(|e| DiscError::io(e, path))?;
    let total = file.metadata().map_err(|e| DiscError::io(e, path))?.len();

    let mut reporter = ProgressReporter::new(progress);
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; chunk_size.min(total.max(1) as usize)];
    let mut processed: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DiscError::Cancelled);
        }

        let read = file.read(&mut buffer).map_err(|e| DiscError::io(e, path))?;
        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
        processed += read as u64;
        reporter.update(processed, total);
    }

    reporter.finish();
    Ok(hex::encode(hasher.finalize()))
}
