use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use std::fs;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use tempfile::tempdir;

use discdec::common::{CancelToken, SECTOR_SIZE};
use discdec::crypto::{self, Key};
use discdec::decrypt::DecryptionEngine;
use discdec::region::{parse_region_table, HEADER_LEN};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

const TOTAL_SECTORS: usize = 4096;

/// An image that is almost entirely one encrypted region.
fn build_image(key: &Key) -> Vec<u8> {
    let mut header = vec![0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&2u32.to_be_bytes());
    let ranges = [(0u32, 2u32), (2, TOTAL_SECTORS as u32 - 2), (TOTAL_SECTORS as u32 - 2, TOTAL_SECTORS as u32)];
    for (i, (start, end)) in ranges.iter().enumerate() {
        let off = 4 + i * 8;
        header[off..off + 4].copy_from_slice(&start.to_be_bytes());
        header[off + 4..off + 8].copy_from_slice(&end.to_be_bytes());
    }

    let mut image = vec![0u8; TOTAL_SECTORS * SECTOR_SIZE];
    image[..HEADER_LEN].copy_from_slice(&header);
    rand::thread_rng().fill_bytes(&mut image[HEADER_LEN..]);

    for sector in 2..(TOTAL_SECTORS as u64 - 2) {
        let offset = sector as usize * SECTOR_SIZE;
        let buf = &mut image[offset..offset + SECTOR_SIZE];
        Aes128CbcEnc::new(key.as_bytes().into(), &crypto::sector_iv(sector).into())
            .encrypt_padded_mut::<NoPadding>(buf, SECTOR_SIZE)
            .unwrap();
    }

    image
}

fn bench_decrypt(c: &mut Criterion) {
    let key = Key::parse("000102030405060708090a0b0c0d0e0f").unwrap();
    let image = build_image(&key);
    let regions = parse_region_table(&image[..HEADER_LEN]).unwrap();

    let dir = tempdir().unwrap();
    let src = dir.path().join("bench.iso");
    let dst = dir.path().join("bench.iso.dec");
    fs::write(&src, &image).unwrap();

    let mut group = c.benchmark_group("decrypt");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.sample_size(10);

    let mut thread_counts = vec![1];
    if default_threads() > 1 {
        thread_counts.push(default_threads());
    }
    for threads in thread_counts {
        let engine = DecryptionEngine::with_threads(threads).unwrap();
        group.bench_function(format!("{threads}_threads"), |b| {
            b.iter(|| {
                engine
                    .decrypt_image(&src, &dst, &key, &regions, &CancelToken::new(), None)
                    .unwrap();
            })
        });
    }
    group.finish();
}

fn default_threads() -> usize {
    discdec::decrypt::default_thread_count()
}

criterion_group!(benches, bench_decrypt);
criterion_main!(benches);
