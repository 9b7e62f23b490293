//! The title/key lookup database.
//!
//! The pipeline consumes key lookup purely as a capability: digest in, title
//! record out. Building or refreshing the database (the setup tool's job) is
//! not this crate's concern; [`TitleDb`] only deserializes the JSON artifact
//! that tool produces and serves lookups from memory.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DiscError, Result};

/// One title entry. Field names follow the database JSON artifact.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TitleRecord {
    #[serde(rename = "game_name")]
    pub name: String,
    pub sha1: String,
    pub hex_key: String,
}

/// Key lookup capability consumed by the pipeline.
///
/// `digest` is the lowercase hex digest of the whole image; matching is
/// case-insensitive. Exactly one key per title.
pub trait KeyLookup {
    fn lookup(&self, digest: &str) -> Option<&TitleRecord>;
}

/// In-memory title database indexed by digest.
pub struct TitleDb {
    by_digest: HashMap<String, TitleRecord>,
}

impl TitleDb {
    /// Load a JSON array of title records from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| DiscError::io(e, path))?;
        let records: Vec<TitleRecord> = serde_json::from_str(&contents)?;
        let db = Self::from_records(records);
        debug!(titles = db.len(), path = %path.display(), "title database loaded");
        Ok(db)
    }

    /// Records with an empty digest cannot be matched and are skipped.
    pub fn from_records(records: Vec<TitleRecord>) -> Self {
        let mut by_digest = HashMap::with_capacity(records.len());
        for record in records {
            if record.sha1.is_empty() {
                continue;
            }
            by_digest.insert(record.sha1.to_ascii_lowercase(), record);
        }
        Self { by_digest }
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}

impl KeyLookup for TitleDb {
    fn lookup(&self, digest: &str) -> Option<&TitleRecord> {
        self.by_digest.get(&digest.to_ascii_lowercase())
    }
}
