//! Keyed file container: sealed metadata header plus sealed content
//!
//! On-disk layout:
//! ```text
//! [4: header_ct_len u32 LE][header_ct_len: seal(header)][rest: seal(content)]
//! ```
//!
//! Header and content are sealed independently under their own nonces so a
//! listing can open the 284-byte header without touching the content.

use coffer_core::{CofferError, CofferResult};
use zeroize::Zeroize;

use crate::aead::{open, seal};
use crate::header::EncryptedFileHeader;
use crate::key::SymmetricKey;

const LEN_PREFIX_SIZE: usize = 4;

/// A sealed file as stored in the vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    pub header_ciphertext: Vec<u8>,
    pub content_ciphertext: Vec<u8>,
}

impl EncryptedFile {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            LEN_PREFIX_SIZE + self.header_ciphertext.len() + self.content_ciphertext.len(),
        );
        out.extend_from_slice(&(self.header_ciphertext.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.header_ciphertext);
        out.extend_from_slice(&self.content_ciphertext);
        out
    }

    pub fn from_bytes(data: &[u8]) -> CofferResult<Self> {
        let (header_ct, content_ct) = split_container(data)?;
        Ok(Self {
            header_ciphertext: header_ct.to_vec(),
            content_ciphertext: content_ct.to_vec(),
        })
    }
}

/// Seal `data` with a fresh header (random id, current time).
pub fn encrypt_file(
    data: &[u8],
    filename: &str,
    mime_type: &str,
    key: &SymmetricKey,
) -> CofferResult<EncryptedFile> {
    let header = EncryptedFileHeader::new(filename, mime_type, data.len() as u64);
    encrypt_file_with_header(&header, data, key)
}

/// Seal `data` under an existing header. Re-encryption uses this to keep the
/// file id and timestamps stable across keys.
pub fn encrypt_file_with_header(
    header: &EncryptedFileHeader,
    data: &[u8],
    key: &SymmetricKey,
) -> CofferResult<EncryptedFile> {
    let mut header_bytes = header.to_bytes();
    let header_ciphertext = seal(&header_bytes, key);
    header_bytes.zeroize();

    Ok(EncryptedFile {
        header_ciphertext: header_ciphertext?,
        content_ciphertext: seal(data, key)?,
    })
}

/// Open a serialized container: header first, then content.
pub fn decrypt_file(data: &[u8], key: &SymmetricKey) -> CofferResult<(EncryptedFileHeader, Vec<u8>)> {
    let (header_ct, content_ct) = split_container(data)?;
    let header = open_header(header_ct, key)?;
    let content = open(content_ct, key)?;

    tracing::debug!(
        file_id = %header.file_id,
        size = content.len(),
        "decrypted container"
    );
    Ok((header, content))
}

/// Decrypt only the metadata header of a serialized container.
pub fn read_header(data: &[u8], key: &SymmetricKey) -> CofferResult<EncryptedFileHeader> {
    let (header_ct, _) = split_container(data)?;
    open_header(header_ct, key)
}

fn open_header(header_ct: &[u8], key: &SymmetricKey) -> CofferResult<EncryptedFileHeader> {
    let mut plain = open(header_ct, key)?;
    let header = EncryptedFileHeader::from_bytes(&plain);
    plain.zeroize();
    header
}

fn split_container(data: &[u8]) -> CofferResult<(&[u8], &[u8])> {
    if data.len() <= LEN_PREFIX_SIZE {
        return Err(CofferError::InvalidFormat(format!(
            "container too short: {} bytes",
            data.len()
        )));
    }
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    len_buf.copy_from_slice(&data[..LEN_PREFIX_SIZE]);
    let header_len = u32::from_le_bytes(len_buf) as usize;

    let content_start = LEN_PREFIX_SIZE
        .checked_add(header_len)
        .filter(|&end| end < data.len())
        .ok_or_else(|| {
            CofferError::InvalidFormat(format!(
                "header length {header_len} out of bounds for {}-byte container",
                data.len()
            ))
        })?;

    Ok((&data[LEN_PREFIX_SIZE..content_start], &data[content_start..]))
}
