//! Title key parsing and per-sector AES-128-CBC decryption.
//!
//! Every sector is decrypted independently: a fresh cipher instance with an
//! IV derived from the sector index, no state carried across sector
//! boundaries. That independence is what lets the engine fan sectors out
//! across worker threads.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

use crate::error::{DiscError, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;

/// A parsed 128-bit title key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Parse a key from its 32-hex-digit string form.
    ///
    /// An optional `0x`/`0X` prefix is tolerated and hex digits are
    /// case-insensitive. Wrong length or non-hex content is a hard
    /// [`DiscError::KeyFormat`] failure, never a warning.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != KEY_LEN * 2 {
            return Err(DiscError::KeyFormat(format!(
                "key must be {} hex characters, got {}",
                KEY_LEN * 2,
                digits.len()
            )));
        }

        let decoded = hex::decode(digits)
            .map_err(|_| DiscError::KeyFormat("key contains non-hex characters".to_string()))?;

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        Ok(Key(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::str::FromStr for Key {
    type Err = DiscError;

    fn from_str(s: &str) -> Result<Self> {
        Key::parse(s)
    }
}

/// Derive the CBC initialization vector for a sector.
///
/// Bytes 0..12 are zero; bytes 12..16 hold the sector index as a big-endian
/// u32. Indices beyond 2^32 wrap, a bounded property of the on-disc scheme.
pub fn sector_iv(sector_index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[12..16].copy_from_slice(&(sector_index as u32).to_be_bytes());
    iv
}

/// An all-zero raw sector is never encrypted, even inside an encrypted
/// region. Sparse or unwritten sectors stay untouched.
pub fn sector_is_blank(sector: &[u8]) -> bool {
    sector.iter().all(|&b| b == 0)
}

/// Decrypt one sector in place.
///
/// Blank sectors are passed through without constructing a cipher. The
/// buffer length must be a multiple of the AES block size, which holds for
/// any whole sector.
pub fn decrypt_sector(sector: &mut [u8], sector_index: u64, key: &Key) -> Result<()> {
    if sector_is_blank(sector) {
        return Ok(());
    }

    let iv = sector_iv(sector_index);
    let sector_len = sector.len();
    Aes128CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_mut::<NoPadding>(sector)
        .map_err(|_| {
            DiscError::Crypto(format!(
                "sector {} has length {} which is not block-aligned",
                sector_index, sector_len
            ))
        })?;

    Ok(())
}
