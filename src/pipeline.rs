//! Per-file processing pipeline.
//!
//! Sequences the stages for one queued image: hash, key lookup, decrypt,
//! extract. Each item is a plain data record with a single writer (the
//! pipeline run driving it); observers subscribe to an event channel instead
//! of sharing mutable state. A failure in one item never aborts its siblings
//! in a batch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::common::CancelToken;
use crate::crypto::Key;
use crate::decrypt::DecryptionEngine;
use crate::error::{DiscError, Result};
use crate::hash;
use crate::progress::ProgressCallback;
use crate::titledb::{KeyLookup, TitleRecord};

/// Lifecycle of one queued image. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    CalculatingHash,
    HashCalculated,
    Decrypting,
    Extracting,
    Completed,
    Error,
}

impl ProcessingStatus {
    /// Canonical user-facing message for each state. `Error` items carry a
    /// custom message instead.
    pub fn default_message(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "Ready to process",
            ProcessingStatus::CalculatingHash => "Calculating hash...",
            ProcessingStatus::HashCalculated => "Hash calculation complete",
            ProcessingStatus::Decrypting => "Decrypting file...",
            ProcessingStatus::Extracting => "Extracting contents...",
            ProcessingStatus::Completed => "Processing complete",
            ProcessingStatus::Error => "",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Error)
    }
}

/// One queued image and its processing state.
///
/// Mutated only by the pipeline driving it; removal of terminal items from a
/// working set is the operator's call, never the pipeline's.
#[derive(Debug, Clone)]
pub struct ProcessingItem {
    pub path: PathBuf,
    pub file_name: String,
    pub status: ProcessingStatus,
    /// Whole-file digest, set once after hashing.
    pub digest: Option<String>,
    /// Matched title record, set once after a successful lookup.
    pub title: Option<TitleRecord>,
    /// Progress in [0, 100], scoped to the current stage.
    pub progress: f64,
    pub status_message: String,
    /// Where the decrypted image landed, set once decryption finishes.
    pub decrypted_path: Option<PathBuf>,
}

impl ProcessingItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            status: ProcessingStatus::Pending,
            digest: None,
            title: None,
            progress: 0.0,
            status_message: ProcessingStatus::Pending.default_message().to_string(),
            decrypted_path: None,
        }
    }
}

/// A change to one item, published on the event channel.
#[derive(Debug, Clone)]
pub enum ItemChange {
    Status { status: ProcessingStatus, message: String },
    Progress { percent: f64 },
}

/// Event channel payload: which item changed and how. `index` is the item's
/// position in the batch passed to the pipeline.
#[derive(Debug, Clone)]
pub struct ItemEvent {
    pub index: usize,
    pub change: ItemChange,
}

/// External extraction collaborator. The pipeline hands over the decrypted
/// image whole and makes no claim about its internal filesystem structure.
pub trait Extractor {
    fn extract(
        &self,
        decrypted_image: &Path,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<()>;
}

/// Drives items through the stage sequence, one at a time.
pub struct Pipeline {
    engine: DecryptionEngine,
    events: Option<Sender<ItemEvent>>,
}

impl Pipeline {
    pub fn new(engine: DecryptionEngine) -> Self {
        Self { engine, events: None }
    }

    /// Publish item changes on `sender`. Sends never block and a dropped
    /// receiver is ignored, so a slow or absent observer cannot stall a run.
    pub fn with_events(mut self, sender: Sender<ItemEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Process a batch sequentially. A failing item is marked `Error` and its
    /// siblings continue; cancellation stops the whole batch, leaving
    /// unstarted items `Pending`. Returns the number of completed items.
    pub fn process_batch(
        &self,
        items: &mut [ProcessingItem],
        db: &dyn KeyLookup,
        extractor: Option<&dyn Extractor>,
        cancel: &CancelToken,
    ) -> usize {
        let mut completed = 0;
        for index in 0..items.len() {
            if cancel.is_cancelled() {
                break;
            }
            match self.process_item(index, &mut items[index], db, extractor, cancel) {
                Ok(()) => completed += 1,
                Err(err) => {
                    debug!(file = %items[index].file_name, error = %err, "item failed");
                }
            }
        }
        completed
    }

    /// Run one item through the full stage sequence. On failure the item is
    /// left in `Error` with a human-readable message and the cause is
    /// returned to the caller.
    pub fn process_item(
        &self,
        index: usize,
        item: &mut ProcessingItem,
        db: &dyn KeyLookup,
        extractor: Option<&dyn Extractor>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let result = self.run_stages(index, item, db, extractor, cancel);

        if let Err(ref err) = result {
            let message = match err {
                DiscError::Cancelled => "Operation cancelled".to_string(),
                DiscError::LookupMiss => "No matching game found".to_string(),
                other => format!("Error: {other}"),
            };
            item.status = ProcessingStatus::Error;
            item.status_message = message.clone();
            self.emit(ItemEvent {
                index,
                change: ItemChange::Status { status: ProcessingStatus::Error, message },
            });
        }

        result
    }

    fn run_stages(
        &self,
        index: usize,
        item: &mut ProcessingItem,
        db: &dyn KeyLookup,
        extractor: Option<&dyn Extractor>,
        cancel: &CancelToken,
    ) -> Result<()> {
        // Hash
        self.transition(index, item, ProcessingStatus::CalculatingHash);
        let (cell, callback) = self.stage_progress(index);
        let digest = hash::hash_file(&item.path, cancel, Some(&callback))?;
        item.progress = current(&cell);
        item.digest = Some(digest.clone());
        self.transition(index, item, ProcessingStatus::HashCalculated);

        // Key lookup, consumed as an external capability. A miss is terminal
        // and decryption never starts.
        let title = db.lookup(&digest).cloned().ok_or(DiscError::LookupMiss)?;
        info!(game = %title.name, digest = %digest, "matched title");
        let key = Key::parse(&title.hex_key)?;
        item.title = Some(title);

        // Decrypt
        self.transition(index, item, ProcessingStatus::Decrypting);
        let (cell, callback) = self.stage_progress(index);
        let dest = self.engine.decrypt_file(&item.path, &key, cancel, Some(&callback))?;
        item.progress = current(&cell);
        item.decrypted_path = Some(dest.clone());

        // Extraction is delegated; without a collaborator the stage completes
        // immediately.
        self.transition(index, item, ProcessingStatus::Extracting);
        if let Some(extractor) = extractor {
            let (_cell, callback) = self.stage_progress(index);
            extractor.extract(&dest, cancel, Some(&callback))?;
        }

        item.progress = 100.0;
        self.emit(ItemEvent { index, change: ItemChange::Progress { percent: 100.0 } });
        self.transition(index, item, ProcessingStatus::Completed);
        Ok(())
    }

    /// Enter a new status. Stages that own a progress scale reset it to zero.
    fn transition(&self, index: usize, item: &mut ProcessingItem, status: ProcessingStatus) {
        if matches!(
            status,
            ProcessingStatus::CalculatingHash
                | ProcessingStatus::Decrypting
                | ProcessingStatus::Extracting
        ) {
            item.progress = 0.0;
            self.emit(ItemEvent { index, change: ItemChange::Progress { percent: 0.0 } });
        }

        item.status = status;
        item.status_message = status.default_message().to_string();
        self.emit(ItemEvent {
            index,
            change: ItemChange::Status { status, message: item.status_message.clone() },
        });
    }

    /// Per-stage progress bridge: engines report fractions, items and
    /// observers see percentages.
    fn stage_progress(&self, index: usize) -> (Arc<Mutex<f64>>, impl Fn(f64) + Send + Sync) {
        let cell = Arc::new(Mutex::new(0.0f64));
        let sink = Arc::clone(&cell);
        let events = self.events.clone();
        let callback = move |fraction: f64| {
            let percent = (fraction * 100.0).clamp(0.0, 100.0);
            *sink.lock().unwrap() = percent;
            if let Some(tx) = &events {
                let _ = tx.send(ItemEvent { index, change: ItemChange::Progress { percent } });
            }
        };
        (cell, callback)
    }

    fn emit(&self, event: ItemEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn current(cell: &Mutex<f64>) -> f64 {
    *cell.lock().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_items_are_pending() {
        let item = ProcessingItem::new("/images/game.iso");
        assert_eq!(item.status, ProcessingStatus::Pending);
        assert_eq!(item.file_name, "game.iso");
        assert_eq!(item.status_message, "Ready to process");
        assert_eq!(item.progress, 0.0);
        assert!(item.digest.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Error.is_terminal());
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Extracting.is_terminal());
    }
}
