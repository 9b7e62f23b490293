use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use crossbeam_channel::unbounded;
use rand::RngCore;
use tempfile::tempdir;

use discdec::common::{CancelToken, SECTOR_SIZE};
use discdec::crypto::{self, Key};
use discdec::decrypt::DecryptionEngine;
use discdec::error::Result;
use discdec::hash;
use discdec::pipeline::{
    Extractor, ItemChange, Pipeline, ProcessingItem, ProcessingStatus,
};
use discdec::progress::ProgressCallback;
use discdec::region::HEADER_LEN;
use discdec::titledb::{TitleDb, TitleRecord};
use discdec::DiscError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

const TEST_KEY: &str = "00112233445566778899aabbccddeeff";

/// A small encrypted image: six sectors, the header filling the first plain
/// region, sectors 2..4 encrypted. Returns (plaintext, encrypted).
fn build_test_image() -> (Vec<u8>, Vec<u8>) {
    let mut header = vec![0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&2u32.to_be_bytes());
    for (i, (start, end)) in [(0u32, 2u32), (2, 4), (4, 6)].iter().enumerate() {
        let off = 4 + i * 8;
        header[off..off + 4].copy_from_slice(&start.to_be_bytes());
        header[off + 4..off + 8].copy_from_slice(&end.to_be_bytes());
    }

    let mut plaintext = vec![0u8; 6 * SECTOR_SIZE];
    plaintext[..HEADER_LEN].copy_from_slice(&header);
    rand::thread_rng().fill_bytes(&mut plaintext[HEADER_LEN..]);

    let key = Key::parse(TEST_KEY).unwrap();
    let mut encrypted = plaintext.clone();
    for sector in 2u64..4 {
        let offset = sector as usize * SECTOR_SIZE;
        let buf = &mut encrypted[offset..offset + SECTOR_SIZE];
        Aes128CbcEnc::new(key.as_bytes().into(), &crypto::sector_iv(sector).into())
            .encrypt_padded_mut::<NoPadding>(buf, SECTOR_SIZE)
            .unwrap();
    }

    (plaintext, encrypted)
}

fn write_image(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// A database whose single entry matches the image at `path`.
fn db_matching(path: &Path, name: &str) -> TitleDb {
    let digest = hash::hash_file(path, &CancelToken::new(), None).unwrap();
    TitleDb::from_records(vec![TitleRecord {
        name: name.to_string(),
        sha1: digest,
        hex_key: TEST_KEY.to_string(),
    }])
}

fn pipeline() -> Pipeline {
    Pipeline::new(DecryptionEngine::with_threads(2).unwrap())
}

#[test]
fn full_pipeline_completes_with_expected_stage_sequence() {
    let (plaintext, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let src = write_image(dir.path(), "title.iso", &encrypted);
    let db = db_matching(&src, "Test Title");

    let (tx, rx) = unbounded();
    let pipeline = pipeline().with_events(tx);

    let mut items = vec![ProcessingItem::new(&src)];
    let completed = pipeline.process_batch(&mut items, &db, None, &CancelToken::new());
    drop(pipeline);

    assert_eq!(completed, 1);
    let item = &items[0];
    assert_eq!(item.status, ProcessingStatus::Completed);
    assert_eq!(item.progress, 100.0);
    assert_eq!(item.status_message, "Processing complete");
    assert_eq!(item.title.as_ref().unwrap().name, "Test Title");
    assert!(item.digest.is_some());

    let dest = item.decrypted_path.as_ref().unwrap();
    assert_eq!(fs::read(dest).unwrap(), plaintext);

    let statuses: Vec<ProcessingStatus> = rx
        .iter()
        .filter_map(|event| match event.change {
            ItemChange::Status { status, .. } => Some(status),
            ItemChange::Progress { .. } => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ProcessingStatus::CalculatingHash,
            ProcessingStatus::HashCalculated,
            ProcessingStatus::Decrypting,
            ProcessingStatus::Extracting,
            ProcessingStatus::Completed,
        ]
    );
}

#[test]
fn lookup_miss_goes_straight_to_error_without_decrypting() {
    let (_, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let src = write_image(dir.path(), "unknown.iso", &encrypted);

    let db = TitleDb::from_records(Vec::new());
    let mut items = vec![ProcessingItem::new(&src)];
    let completed = pipeline().process_batch(&mut items, &db, None, &CancelToken::new());

    assert_eq!(completed, 0);
    let item = &items[0];
    assert_eq!(item.status, ProcessingStatus::Error);
    assert_eq!(item.status_message, "No matching game found");
    assert!(item.digest.is_some(), "hashing ran before the lookup");
    assert!(item.decrypted_path.is_none());
    assert!(
        !discdec::decrypt::decrypted_path(&src).exists(),
        "decryption must never start on a lookup miss"
    );
}

#[test]
fn malformed_database_key_fails_the_item_before_decryption() {
    let (_, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let src = write_image(dir.path(), "badkey.iso", &encrypted);

    let digest = hash::hash_file(&src, &CancelToken::new(), None).unwrap();
    let db = TitleDb::from_records(vec![TitleRecord {
        name: "Bad Key".to_string(),
        sha1: digest,
        hex_key: "not-a-key".to_string(),
    }]);

    let mut items = vec![ProcessingItem::new(&src)];
    let completed = pipeline().process_batch(&mut items, &db, None, &CancelToken::new());

    assert_eq!(completed, 0);
    assert_eq!(items[0].status, ProcessingStatus::Error);
    assert!(items[0].status_message.contains("invalid key"));
    assert!(!discdec::decrypt::decrypted_path(&src).exists());
}

#[test]
fn a_failing_item_does_not_abort_its_siblings() {
    let (plaintext, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let good = write_image(dir.path(), "good.iso", &encrypted);
    let db = db_matching(&good, "Good Title");

    let mut items = vec![
        ProcessingItem::new(dir.path().join("missing.iso")),
        ProcessingItem::new(&good),
    ];
    let completed = pipeline().process_batch(&mut items, &db, None, &CancelToken::new());

    assert_eq!(completed, 1);
    assert_eq!(items[0].status, ProcessingStatus::Error);
    assert_eq!(items[1].status, ProcessingStatus::Completed);
    assert_eq!(
        fs::read(items[1].decrypted_path.as_ref().unwrap()).unwrap(),
        plaintext
    );
}

#[test]
fn pre_cancelled_batch_leaves_items_pending() {
    let (_, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let src = write_image(dir.path(), "pending.iso", &encrypted);
    let db = db_matching(&src, "Never Started");

    let cancel = CancelToken::new();
    cancel.cancel();

    let mut items = vec![ProcessingItem::new(&src)];
    let completed = pipeline().process_batch(&mut items, &db, None, &cancel);

    assert_eq!(completed, 0);
    assert_eq!(items[0].status, ProcessingStatus::Pending);
}

struct RecordingExtractor {
    seen: Mutex<Option<PathBuf>>,
}

impl Extractor for RecordingExtractor {
    fn extract(
        &self,
        decrypted_image: &Path,
        _cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        *self.seen.lock().unwrap() = Some(decrypted_image.to_path_buf());
        if let Some(callback) = progress {
            callback(1.0);
        }
        Ok(())
    }
}

#[test]
fn extractor_is_handed_the_decrypted_image() {
    let (_, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let src = write_image(dir.path(), "extract.iso", &encrypted);
    let db = db_matching(&src, "Extract Me");

    let extractor = RecordingExtractor { seen: Mutex::new(None) };
    let mut items = vec![ProcessingItem::new(&src)];
    let completed =
        pipeline().process_batch(&mut items, &db, Some(&extractor), &CancelToken::new());

    assert_eq!(completed, 1);
    assert_eq!(items[0].status, ProcessingStatus::Completed);
    assert_eq!(
        extractor.seen.lock().unwrap().as_deref(),
        items[0].decrypted_path.as_deref()
    );
}

/// Cancels the shared token mid-stage, the way an operator's stop request
/// lands while extraction is running.
struct CancellingExtractor;

impl Extractor for CancellingExtractor {
    fn extract(
        &self,
        _decrypted_image: &Path,
        cancel: &CancelToken,
        _progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        cancel.cancel();
        Err(DiscError::Cancelled)
    }
}

#[test]
fn cancellation_mid_item_reports_cancelled_and_stops_the_batch() {
    let (_, encrypted) = build_test_image();
    let dir = tempdir().unwrap();
    let first = write_image(dir.path(), "first.iso", &encrypted);
    let second = write_image(dir.path(), "second.iso", &encrypted);
    let db = db_matching(&first, "First Title");

    let cancel = CancelToken::new();
    let mut items = vec![ProcessingItem::new(&first), ProcessingItem::new(&second)];
    let completed =
        pipeline().process_batch(&mut items, &db, Some(&CancellingExtractor), &cancel);

    assert_eq!(completed, 0);
    assert_eq!(items[0].status, ProcessingStatus::Error);
    assert_eq!(items[0].status_message, "Operation cancelled");
    assert_eq!(items[1].status, ProcessingStatus::Pending);
}
