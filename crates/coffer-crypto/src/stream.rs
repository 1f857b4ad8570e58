//! Chunked streaming container for payloads too large to seal in one shot
//!
//! Container format (integers little-endian):
//! ```text
//! header (33 bytes):
//!   [4: magic "VCSE"][1: version][4: chunk_size][4: total_chunks][8: original_size][12: base_nonce]
//! then total_chunks times:
//!   [4: sealed_len][sealed_len: ciphertext || 16-byte tag]
//! ```
//!
//! Chunk `i` is sealed with `nonce_i = base_nonce ^ (i as u64 BE)` over the
//! low 8 bytes, and the 33 header bytes as AAD. The AAD binds every chunk to
//! its container, so dropping, reordering or splicing chunks between files
//! fails authentication. The base nonce is fresh per file.
//!
//! Peak memory is one plaintext chunk plus one sealed chunk regardless of the
//! payload size.

use std::io::{self, Read, Write};

use coffer_core::{CofferError, CofferResult};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use crate::aead::{open_with_nonce, seal_with_nonce};
use crate::key::SymmetricKey;
use crate::random::random_nonce;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Leading bytes identifying a streaming container.
pub const STREAM_MAGIC: [u8; 4] = *b"VCSE";

/// Current container version. Stable across releases.
pub const STREAM_VERSION: u8 = 1;

/// Serialized header length.
pub const STREAM_HEADER_SIZE: usize = 4 + 1 + 4 + 4 + 8 + NONCE_SIZE;

const LEN_PREFIX_SIZE: usize = 4;

/// Largest chunk whose sealed length (plaintext + tag) fits the u32 prefix.
pub const MAX_CHUNK_SIZE: u32 = u32::MAX - TAG_SIZE as u32;

/// Progress callback: `(plaintext_bytes_done, plaintext_bytes_total)`.
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Cancellation and progress hooks for a streaming run.
///
/// Cancellation is checked between chunks, never mid-chunk.
#[derive(Clone, Copy, Default)]
pub struct StreamControl<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a ProgressFn<'a>>,
}

impl<'a> StreamControl<'a> {
    pub fn with_cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub(crate) fn check_cancelled(&self) -> CofferResult<()> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(CofferError::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn report(&self, done: u64, total: u64) {
        if let Some(progress) = self.progress {
            progress(done, total);
        }
    }
}

/// Parsed container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u8,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub original_size: u64,
    pub base_nonce: [u8; NONCE_SIZE],
}

impl StreamHeader {
    pub fn new(chunk_size: u32, original_size: u64, base_nonce: [u8; NONCE_SIZE]) -> CofferResult<Self> {
        Ok(Self {
            version: STREAM_VERSION,
            chunk_size,
            total_chunks: chunk_count(original_size, chunk_size)?,
            original_size,
            base_nonce,
        })
    }

    pub fn to_bytes(&self) -> [u8; STREAM_HEADER_SIZE] {
        let mut out = [0u8; STREAM_HEADER_SIZE];
        out[0..4].copy_from_slice(&STREAM_MAGIC);
        out[4] = self.version;
        out[5..9].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[9..13].copy_from_slice(&self.total_chunks.to_le_bytes());
        out[13..21].copy_from_slice(&self.original_size.to_le_bytes());
        out[21..33].copy_from_slice(&self.base_nonce);
        out
    }

    /// Parse and validate the first [`STREAM_HEADER_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> CofferResult<Self> {
        if data.len() < STREAM_HEADER_SIZE {
            return Err(CofferError::InvalidFormat(format!(
                "stream header too short: {} bytes (minimum {STREAM_HEADER_SIZE})",
                data.len()
            )));
        }
        if data[0..4] != STREAM_MAGIC {
            return Err(CofferError::InvalidFormat("bad stream magic".into()));
        }
        let version = data[4];
        if version != STREAM_VERSION {
            return Err(CofferError::InvalidFormat(format!(
                "unsupported stream version {version}"
            )));
        }

        let chunk_size = u32::from_le_bytes(le_array(&data[5..9]));
        let total_chunks = u32::from_le_bytes(le_array(&data[9..13]));
        let original_size = u64::from_le_bytes(le_array(&data[13..21]));
        let mut base_nonce = [0u8; NONCE_SIZE];
        base_nonce.copy_from_slice(&data[21..33]);

        let expected_chunks = chunk_count(original_size, chunk_size)?;
        if total_chunks != expected_chunks {
            return Err(CofferError::InvalidFormat(format!(
                "stream header declares {total_chunks} chunks, size implies {expected_chunks}"
            )));
        }

        Ok(Self {
            version,
            chunk_size,
            total_chunks,
            original_size,
            base_nonce,
        })
    }

    /// Plaintext length of chunk `index`; only the last chunk may be short.
    pub fn chunk_plaintext_len(&self, index: u32) -> usize {
        if index + 1 < self.total_chunks {
            self.chunk_size as usize
        } else {
            let full = u64::from(self.total_chunks.saturating_sub(1)) * u64::from(self.chunk_size);
            (self.original_size - full) as usize
        }
    }

    /// Total container length on disk.
    pub fn encrypted_len(&self) -> u64 {
        STREAM_HEADER_SIZE as u64
            + u64::from(self.total_chunks) * (LEN_PREFIX_SIZE + TAG_SIZE) as u64
            + self.original_size
    }
}

/// `ceil(original_size / chunk_size)`, which must fit in a `u32`.
pub fn chunk_count(original_size: u64, chunk_size: u32) -> CofferResult<u32> {
    if chunk_size == 0 {
        return Err(CofferError::InvalidFormat("chunk size must be > 0".into()));
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(CofferError::InvalidFormat(format!(
            "chunk size {chunk_size} exceeds maximum {MAX_CHUNK_SIZE}"
        )));
    }
    let count = original_size.div_ceil(u64::from(chunk_size));
    u32::try_from(count).map_err(|_| {
        CofferError::InvalidFormat(format!(
            "{original_size} bytes needs {count} chunks of {chunk_size}, more than a u32 holds"
        ))
    })
}

/// Per-chunk nonce: the big-endian chunk index XORed into the low 8 bytes of
/// the base nonce. Distinct for every index under one base nonce.
pub fn chunk_nonce(base_nonce: &[u8; NONCE_SIZE], chunk_index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base_nonce;
    for (n, i) in nonce[NONCE_SIZE - 8..].iter_mut().zip(chunk_index.to_be_bytes()) {
        *n ^= i;
    }
    nonce
}

/// Encrypt `original_size` bytes from `reader` into a container on `writer`.
///
/// `reader` must yield at least `original_size` bytes; a short source fails
/// with an `UnexpectedEof` I/O error. On any error the bytes already written
/// are garbage and the caller discards the sink.
pub fn encrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    original_size: u64,
    key: &SymmetricKey,
    chunk_size: u32,
    control: StreamControl<'_>,
) -> CofferResult<StreamHeader> {
    let header = StreamHeader::new(chunk_size, original_size, random_nonce()?)?;
    let header_bytes = header.to_bytes();
    writer.write_all(&header_bytes)?;

    let buf_len = (chunk_size as u64).min(original_size) as usize;
    let mut buf = vec![0u8; buf_len];
    let mut done = 0u64;

    for index in 0..header.total_chunks {
        control.check_cancelled()?;

        let len = header.chunk_plaintext_len(index);
        let chunk = &mut buf[..len];
        reader.read_exact(chunk)?;

        let nonce = chunk_nonce(&header.base_nonce, u64::from(index));
        let sealed = seal_with_nonce(key, &nonce, chunk, &header_bytes)?;
        let sealed_len = u32::try_from(sealed.len()).map_err(|_| {
            CofferError::InvalidFormat(format!("sealed chunk of {} bytes", sealed.len()))
        })?;
        writer.write_all(&sealed_len.to_le_bytes())?;
        writer.write_all(&sealed)?;

        done += len as u64;
        control.report(done, original_size);
        tracing::trace!(chunk = index, len, "sealed stream chunk");
    }
    buf.zeroize();
    writer.flush()?;

    tracing::debug!(
        chunks = header.total_chunks,
        chunk_size,
        original_size,
        "stream encryption complete"
    );
    Ok(header)
}

/// Decrypt a container from `reader`, writing plaintext chunk by chunk.
///
/// Returns the number of plaintext bytes written. Plaintext of chunks that
/// verified before a failure may already be in `writer`; the caller must treat
/// the sink as invalid on any error.
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &SymmetricKey,
    control: StreamControl<'_>,
) -> CofferResult<u64> {
    let mut header_bytes = [0u8; STREAM_HEADER_SIZE];
    read_exact_or_truncated(&mut reader, &mut header_bytes, "stream header")?;
    let header = StreamHeader::parse(&header_bytes)?;

    let mut sealed = Vec::new();
    let mut written = 0u64;

    for index in 0..header.total_chunks {
        control.check_cancelled()?;

        let mut len_buf = [0u8; LEN_PREFIX_SIZE];
        read_exact_or_truncated(&mut reader, &mut len_buf, "chunk length")?;
        let sealed_len = u32::from_le_bytes(len_buf) as usize;
        let expected_len = header.chunk_plaintext_len(index) + TAG_SIZE;
        if sealed_len != expected_len {
            return Err(CofferError::InvalidFormat(format!(
                "chunk {index} length {sealed_len}, expected {expected_len}"
            )));
        }

        sealed.resize(sealed_len, 0);
        read_exact_or_truncated(&mut reader, &mut sealed, "chunk body")?;

        let nonce = chunk_nonce(&header.base_nonce, u64::from(index));
        let mut plaintext = open_with_nonce(key, &nonce, &sealed, &header_bytes)?;
        writer.write_all(&plaintext)?;
        written += plaintext.len() as u64;
        plaintext.zeroize();

        control.report(written, header.original_size);
        tracing::trace!(chunk = index, "opened stream chunk");
    }

    if has_trailing_data(&mut reader)? {
        return Err(CofferError::InvalidFormat(
            "trailing data after final chunk".into(),
        ));
    }
    writer.flush()?;

    tracing::debug!(
        chunks = header.total_chunks,
        bytes = written,
        "stream decryption complete"
    );
    Ok(written)
}

/// Seal an in-memory buffer as a streaming container.
pub fn encrypt_streaming(data: &[u8], key: &SymmetricKey, chunk_size: u32) -> CofferResult<Vec<u8>> {
    let expected = StreamHeader::new(chunk_size, data.len() as u64, [0u8; NONCE_SIZE])?;
    let mut out = Vec::with_capacity(expected.encrypted_len() as usize);
    encrypt_stream(data, &mut out, data.len() as u64, key, chunk_size, StreamControl::default())?;
    Ok(out)
}

/// Open an in-memory streaming container. All-or-nothing.
pub fn decrypt_streaming(data: &[u8], key: &SymmetricKey) -> CofferResult<Vec<u8>> {
    let header = StreamHeader::parse(data)?;
    let capacity = header.original_size.min(data.len() as u64) as usize;
    let mut out = Vec::with_capacity(capacity);
    if let Err(e) = decrypt_stream(data, &mut out, key, StreamControl::default()) {
        out.zeroize();
        return Err(e);
    }
    Ok(out)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> CofferResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            CofferError::InvalidFormat(format!("stream truncated in {what}"))
        }
        _ => CofferError::Io(e),
    })
}

fn has_trailing_data<R: Read>(reader: &mut R) -> CofferResult<bool> {
    let mut trailing = [0u8; 1];
    loop {
        match reader.read(&mut trailing) {
            Ok(n) => return Ok(n > 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
