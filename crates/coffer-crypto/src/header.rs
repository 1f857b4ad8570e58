//! Fixed 256-byte metadata record sealed at the front of every container
//!
//! Layout (integers little-endian, strings UTF-8 zero-padded):
//! ```text
//! [0..16)    file_id (raw UUID bytes)
//! [16..24)   original_size u64
//! [24..32)   created_at f64, seconds since the Unix epoch
//! [32..132)  original_filename, ≤100 bytes
//! [132..182) mime_type, ≤50 bytes
//! [182..256) reserved, zero
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use coffer_core::{CofferError, CofferResult};
use uuid::Uuid;

/// Serialized header length.
pub const HEADER_SIZE: usize = 256;

/// Maximum stored filename length in bytes.
pub const MAX_FILENAME_LEN: usize = 100;

/// Maximum stored MIME type length in bytes.
pub const MAX_MIME_LEN: usize = 50;

const FILENAME_OFFSET: usize = 32;
const MIME_OFFSET: usize = FILENAME_OFFSET + MAX_FILENAME_LEN;
const RESERVED_OFFSET: usize = MIME_OFFSET + MAX_MIME_LEN;

#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedFileHeader {
    pub file_id: Uuid,
    pub original_filename: String,
    pub mime_type: String,
    pub original_size: u64,
    pub created_at: f64,
}

impl EncryptedFileHeader {
    /// A header for a new file: random id, current time.
    ///
    /// Strings longer than their field are truncated here, at a character
    /// boundary, so the in-memory value matches what deserializes.
    pub fn new(filename: &str, mime_type: &str, original_size: u64) -> Self {
        Self {
            file_id: Uuid::new_v4(),
            original_filename: truncate_utf8(filename, MAX_FILENAME_LEN).to_string(),
            mime_type: truncate_utf8(mime_type, MAX_MIME_LEN).to_string(),
            original_size,
            created_at: now_secs(),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..16].copy_from_slice(self.file_id.as_bytes());
        out[16..24].copy_from_slice(&self.original_size.to_le_bytes());
        out[24..32].copy_from_slice(&self.created_at.to_le_bytes());

        let name = truncate_utf8(&self.original_filename, MAX_FILENAME_LEN).as_bytes();
        out[FILENAME_OFFSET..FILENAME_OFFSET + name.len()].copy_from_slice(name);

        let mime = truncate_utf8(&self.mime_type, MAX_MIME_LEN).as_bytes();
        out[MIME_OFFSET..MIME_OFFSET + mime.len()].copy_from_slice(mime);
        out
    }

    pub fn from_bytes(data: &[u8]) -> CofferResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CofferError::InvalidFormat(format!(
                "file header too short: {} bytes (expected {HEADER_SIZE})",
                data.len()
            )));
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&data[0..16]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&data[16..24]);
        let mut created = [0u8; 8];
        created.copy_from_slice(&data[24..32]);

        Ok(Self {
            file_id: Uuid::from_bytes(id),
            original_size: u64::from_le_bytes(size),
            created_at: f64::from_le_bytes(created),
            original_filename: read_padded(&data[FILENAME_OFFSET..MIME_OFFSET], "filename")?,
            mime_type: read_padded(&data[MIME_OFFSET..RESERVED_OFFSET], "mime type")?,
        })
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_padded(field: &[u8], what: &str) -> CofferResult<String> {
    let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8(field[..end].to_vec())
        .map_err(|_| CofferError::InvalidFormat(format!("header {what} is not UTF-8")))
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
