//! Common constants and types shared across the engines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fixed sector size of the disc images we process. The sector is the unit
/// of encryption and of IV derivation.
pub const SECTOR_SIZE: usize = 2048;

/// Sectors per I/O chunk (8 MiB). Bounds memory use while keeping reads
/// large enough to stay sequential.
pub const CHUNK_SECTORS: usize = 4096;

/// Cooperative cancellation flag shared between an operation and its caller.
///
/// Cancellation is observed at chunk granularity inside the engines and at
/// stage boundaries inside the pipeline; nothing is interrupted mid-chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones of this token observe the request.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
