//! File staging: encrypt plaintext files into the vault and back out
//!
//! Output always goes to a temporary file next to the destination and is
//! renamed into place only after the whole operation succeeded. On error or
//! cancellation the temporary file is removed and the destination untouched.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use coffer_core::types::FormatKind;
use coffer_core::{CofferError, CofferResult};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use crate::aead::{open, seal};
use crate::dispatch::{sniff_format, StagingPolicy};
use crate::key::{key_fingerprint, SymmetricKey};
use crate::stream::{decrypt_stream, encrypt_stream, StreamControl, STREAM_MAGIC};

/// One file to import in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Result of a successful stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub format: FormatKind,
    pub original_size: u64,
    pub encrypted_size: u64,
}

/// Per-vault staging directory: `root/<key fingerprint>`.
pub fn staging_dir(root: &Path, key: &SymmetricKey) -> PathBuf {
    root.join(key_fingerprint(key))
}

/// Encrypt the file at `src` into `dest`, picking the format by size.
pub fn stage_file(
    src: &Path,
    dest: &Path,
    key: &SymmetricKey,
    policy: &StagingPolicy,
    control: StreamControl<'_>,
) -> CofferResult<StagedFile> {
    control.check_cancelled()?;

    let source = File::open(src)?;
    let original_size = source.metadata()?.len();
    let format = policy.select(original_size);

    let mut tmp = temp_beside(dest)?;
    match format {
        FormatKind::SingleShot => {
            let mut data = Vec::with_capacity(original_size as usize);
            BufReader::new(source).read_to_end(&mut data)?;
            let sealed = seal(&data, key);
            data.zeroize();
            tmp.as_file_mut().write_all(&sealed?)?;
        }
        FormatKind::Streaming => {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            encrypt_stream(
                BufReader::new(source),
                &mut writer,
                original_size,
                key,
                policy.chunk_size,
                control,
            )?;
            writer.flush()?;
        }
    }

    let encrypted_size = persist(tmp, dest)?;
    tracing::debug!(
        dest = %dest.display(),
        %format,
        original_size,
        encrypted_size,
        "staged file"
    );

    Ok(StagedFile {
        path: dest.to_path_buf(),
        format,
        original_size,
        encrypted_size,
    })
}

/// Decrypt a staged file of either format into `dest`.
///
/// Returns the plaintext length. Plaintext reaches `dest` only after every
/// byte has authenticated.
pub fn unstage_file(
    src: &Path,
    dest: &Path,
    key: &SymmetricKey,
    control: StreamControl<'_>,
) -> CofferResult<u64> {
    control.check_cancelled()?;

    let mut source = File::open(src)?;
    let mut magic = [0u8; STREAM_MAGIC.len()];
    let sniffed = read_up_to(&mut source, &mut magic)?;
    source.rewind()?;
    let format = sniff_format(&magic[..sniffed]);

    let mut tmp = temp_beside(dest)?;
    let written = match format {
        FormatKind::Streaming => {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let written = decrypt_stream(BufReader::new(source), &mut writer, key, control)?;
            writer.flush()?;
            written
        }
        FormatKind::SingleShot => {
            let mut sealed = Vec::new();
            BufReader::new(source).read_to_end(&mut sealed)?;
            let mut plaintext = open(&sealed, key)?;
            let result = tmp.as_file_mut().write_all(&plaintext);
            let len = plaintext.len() as u64;
            plaintext.zeroize();
            result?;
            len
        }
    };

    persist(tmp, dest)?;
    tracing::debug!(dest = %dest.display(), %format, bytes = written, "unstaged file");
    Ok(written)
}

/// Stage many files in parallel on the rayon pool.
///
/// Results are returned in job order. A cancelled token fails the jobs that
/// have not finished yet with `Cancelled`; completed ones stay staged.
pub fn stage_batch(
    jobs: &[StageJob],
    key: &SymmetricKey,
    policy: &StagingPolicy,
    cancel: Option<&CancellationToken>,
) -> Vec<CofferResult<StagedFile>> {
    let control = StreamControl {
        cancel,
        progress: None,
    };

    let results: Vec<_> = jobs
        .par_iter()
        .map(|job| stage_file(&job.source, &job.dest, key, policy, control))
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        tracing::warn!(total = jobs.len(), failed, "batch staging finished with failures");
    } else {
        tracing::info!(total = jobs.len(), "batch staging complete");
    }
    results
}

pub(crate) fn temp_beside(dest: &Path) -> CofferResult<NamedTempFile> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new()
        .prefix(".coffer-tmp-")
        .tempfile_in(dir)?)
}

pub(crate) fn persist(tmp: NamedTempFile, dest: &Path) -> CofferResult<u64> {
    tmp.as_file().sync_all()?;
    let file = tmp.persist(dest).map_err(|e| CofferError::Io(e.error))?;
    Ok(file.metadata()?.len())
}

/// Fill as much of `buf` as the source holds; returns the count read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> CofferResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
