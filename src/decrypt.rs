//! The streaming, sector-parallel decryption engine.
//!
//! The engine walks the region table in header order, copying plain regions
//! byte-for-byte and decrypting encrypted ones, in fixed-size chunks of
//! [`CHUNK_SECTORS`] sectors. All I/O is sequential and single-threaded;
//! only the cipher transform fans out, one worker per disjoint sector slice
//! of the chunk buffer. A running sector cursor must match each region's
//! declared start, so a table that skips or overlaps sectors fails loudly
//! instead of being resynchronized.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::common::{CancelToken, CHUNK_SECTORS, SECTOR_SIZE};
use crate::crypto::{self, Key};
use crate::error::{DiscError, Result};
use crate::progress::{ProgressCallback, ProgressReporter};
use crate::region::{self, Region, HEADER_LEN};

/// Worker pool size: available hardware parallelism minus one, floor of one.
/// One core is left free for the sequential I/O thread.
pub fn default_thread_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Owns the worker pool and drives whole-image decryption runs.
///
/// The pool is built once and reused across calls; an engine can decrypt any
/// number of images.
pub struct DecryptionEngine {
    pool: rayon::ThreadPool,
}

impl DecryptionEngine {
    pub fn new() -> Result<Self> {
        Self::with_threads(default_thread_count())
    }

    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| DiscError::Other(Box::new(e)))?;
        Ok(Self { pool })
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Decrypt `source` into `<source>.dec` using the region table embedded
    /// in the image's own header. Returns the destination path.
    pub fn decrypt_file(
        &self,
        source: &Path,
        key: &Key,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf> {
        let regions = read_region_table(source)?;
        let dest = decrypted_path(source);
        self.decrypt_image(source, &dest, key, &regions, cancel, progress)?;
        Ok(dest)
    }

    /// Decrypt `source` into `dest` according to `regions`.
    ///
    /// The destination is pre-sized to the source length. Progress is emitted
    /// after each chunk as sectors processed over the source's total sector
    /// count; cancellation is checked before each chunk read.
    pub fn decrypt_image(
        &self,
        source: &Path,
        dest: &Path,
        key: &Key,
        regions: &[Region],
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let mut src = File::open(source).map_err(|e| DiscError::io(e, source))?;
        let file_len = src.metadata().map_err(|e| DiscError::io(e, source))?.len();

        if file_len % SECTOR_SIZE as u64 != 0 {
            return Err(DiscError::Format(format!(
                "file size {file_len} is not a multiple of the {SECTOR_SIZE}-byte sector size"
            )));
        }
        let total_sectors = file_len / SECTOR_SIZE as u64;

        debug!(
            source = %source.display(),
            total_sectors,
            regions = regions.len(),
            threads = self.thread_count(),
            "starting decryption"
        );

        let mut dst = File::create(dest).map_err(|e| DiscError::io(e, dest))?;
        dst.set_len(file_len).map_err(|e| DiscError::io(e, dest))?;

        let mut reporter = ProgressReporter::new(progress);
        let mut buffer = vec![0u8; CHUNK_SECTORS * SECTOR_SIZE];
        let mut cursor: u64 = 0;

        for region in regions {
            if region.start != cursor {
                return Err(DiscError::Consistency { declared: region.start, cursor });
            }

            let mut remaining = region.sectors();
            while remaining > 0 {
                if cancel.is_cancelled() {
                    return Err(DiscError::Cancelled);
                }

                let chunk_sectors = remaining.min(CHUNK_SECTORS as u64) as usize;
                let chunk = &mut buffer[..chunk_sectors * SECTOR_SIZE];

                read_full(&mut src, chunk, source)?;
                if region.is_encrypted() {
                    self.decrypt_chunk(chunk, cursor, key)?;
                }
                dst.write_all(chunk).map_err(|e| DiscError::io(e, dest))?;

                cursor += chunk_sectors as u64;
                remaining -= chunk_sectors as u64;
                reporter.update(cursor, total_sectors);
            }
        }

        dst.flush().map_err(|e| DiscError::io(e, dest))?;

        // The region table is authoritative for the walk; a disagreement with
        // the raw file length is a data-integrity discrepancy, not a failure.
        let table_sectors = region::total_sectors(regions);
        if table_sectors != total_sectors {
            warn!(
                table_sectors,
                file_sectors = total_sectors,
                "region table sector count disagrees with file length"
            );
        }

        debug!(source = %source.display(), "decryption finished");
        Ok(())
    }

    /// Decrypt every sector of one chunk in parallel. Sectors are disjoint
    /// slices of the chunk buffer, so workers never touch overlapping bytes.
    fn decrypt_chunk(&self, chunk: &mut [u8], base_sector: u64, key: &Key) -> Result<()> {
        self.pool.install(|| {
            chunk
                .par_chunks_mut(SECTOR_SIZE)
                .enumerate()
                .try_for_each(|(i, sector)| {
                    crypto::decrypt_sector(sector, base_sector + i as u64, key)
                })
        })
    }
}

/// Canonical destination path for a decrypted image: the source path with a
/// `.dec` suffix appended.
pub fn decrypted_path(source: &Path) -> PathBuf {
    let mut path = source.as_os_str().to_os_string();
    path.push(".dec");
    PathBuf::from(path)
}

/// Read and parse the region table from the first [`HEADER_LEN`] bytes of an
/// image file.
pub fn read_region_table(source: &Path) -> Result<Vec<Region>> {
    let mut file = File::open(source).map_err(|e| DiscError::io(e, source))?;
    let mut header = vec![0u8; HEADER_LEN];
    read_full(&mut file, &mut header, source)?;
    region::parse_region_table(&header)
}

/// Fill `buf` completely from `src`, mapping exhaustion to a short read that
/// records the requested and obtained byte counts.
fn read_full(src: &mut File, buf: &mut [u8], path: &Path) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = src.read(&mut buf[filled..]).map_err(|e| DiscError::io(e, path))?;
        if read == 0 {
            return Err(DiscError::ShortRead { requested: buf.len(), obtained: filled });
        }
        filled += read;
    }
    Ok(())
}
