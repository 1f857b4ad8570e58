//! Shared-vault bundles
//!
//! A bundle is a directory holding a re-encrypted subset of the vault:
//! - `<file_id>.coffer`: each container, re-sealed under the share key
//! - `manifest.sealed`: JSON manifest sealed under the share key, listing every
//!   entry with an integrity code over its container bytes
//!
//! The share key is independent of the device salt, so a bundle opens on any
//! device that knows it. Export first removes any manifest already in the
//! directory and writes the new one last, atomically, so a bundle interrupted
//! mid-export has no manifest and is rejected on import.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use coffer_core::{CofferError, CofferResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::aead::{open, seal};
use crate::container::{decrypt_file, encrypt_file_with_header, EncryptedFile};
use crate::header::EncryptedFileHeader;
use crate::integrity::{integrity_code, verify_integrity};
use crate::key::{key_fingerprint, SymmetricKey};
use crate::staging::{persist, temp_beside};

/// File name of the sealed manifest inside a bundle directory.
pub const MANIFEST_FILE: &str = "manifest.sealed";

const BUNDLE_VERSION: u32 = 1;
const CONTAINER_EXT: &str = "coffer";

/// One file listed in a bundle manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleEntry {
    pub file_id: Uuid,
    pub original_filename: String,
    pub original_size: u64,
    /// HMAC over the container file under the share key (hex)
    pub integrity: String,
}

/// Decrypted bundle manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: u32,
    pub share_key_fingerprint: String,
    pub exported_at: f64,
    pub entries: Vec<BundleEntry>,
}

/// What `export_bundle` wrote
#[derive(Debug, Clone)]
pub struct ExportedBundle {
    pub manifest_path: PathBuf,
    pub container_paths: Vec<PathBuf>,
    pub share_key_fingerprint: String,
}

/// A bundle file, re-encrypted under the importing vault's key
#[derive(Debug, Clone)]
pub struct ImportedEntry {
    pub header: EncryptedFileHeader,
    pub container: EncryptedFile,
}

/// Re-seal a serialized container under `to_key`, keeping its header.
pub fn reencrypt_file(
    data: &[u8],
    from_key: &SymmetricKey,
    to_key: &SymmetricKey,
) -> CofferResult<EncryptedFile> {
    let (header, mut content) = decrypt_file(data, from_key)?;
    let result = encrypt_file_with_header(&header, &content, to_key);
    content.zeroize();
    result
}

/// Write `containers` (sealed under `vault_key`) into `dest_dir` as a bundle
/// sealed under `share_key`.
pub fn export_bundle(
    containers: &[Vec<u8>],
    dest_dir: &Path,
    vault_key: &SymmetricKey,
    share_key: &SymmetricKey,
) -> CofferResult<ExportedBundle> {
    fs::create_dir_all(dest_dir)?;
    let manifest_path = dest_dir.join(MANIFEST_FILE);
    remove_stale(&manifest_path)?;

    let mut entries = Vec::with_capacity(containers.len());
    let mut container_paths = Vec::with_capacity(containers.len());

    for data in containers {
        let (header, mut content) = decrypt_file(data, vault_key)?;
        let resealed = encrypt_file_with_header(&header, &content, share_key);
        content.zeroize();
        let bytes = resealed?.to_bytes();

        let path = container_path(dest_dir, &header.file_id);
        fs::write(&path, &bytes)?;

        entries.push(BundleEntry {
            file_id: header.file_id,
            original_filename: header.original_filename,
            original_size: header.original_size,
            integrity: hex::encode(integrity_code(share_key, &bytes)?),
        });
        container_paths.push(path);
    }

    let manifest = BundleManifest {
        version: BUNDLE_VERSION,
        share_key_fingerprint: key_fingerprint(share_key),
        exported_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
        entries,
    };
    let mut json = serde_json::to_vec(&manifest)
        .map_err(|e| CofferError::Other(anyhow::anyhow!("manifest serialization: {e}")))?;
    let sealed = seal(&json, share_key);
    json.zeroize();

    let mut tmp = temp_beside(&manifest_path)?;
    tmp.as_file_mut().write_all(&sealed?)?;
    persist(tmp, &manifest_path)?;

    tracing::info!(
        files = manifest.entries.len(),
        share_key = %manifest.share_key_fingerprint,
        dir = %dest_dir.display(),
        "exported bundle"
    );

    Ok(ExportedBundle {
        manifest_path,
        container_paths,
        share_key_fingerprint: manifest.share_key_fingerprint,
    })
}

/// Open and decrypt the manifest of the bundle at `src_dir`.
pub fn read_manifest(src_dir: &Path, share_key: &SymmetricKey) -> CofferResult<BundleManifest> {
    let sealed = fs::read(src_dir.join(MANIFEST_FILE))?;
    let mut json = open(&sealed, share_key)?;
    let manifest: Result<BundleManifest, _> = serde_json::from_slice(&json);
    json.zeroize();

    let manifest = manifest
        .map_err(|e| CofferError::InvalidFormat(format!("bundle manifest: {e}")))?;
    if manifest.version != BUNDLE_VERSION {
        return Err(CofferError::InvalidFormat(format!(
            "unsupported bundle version {}",
            manifest.version
        )));
    }
    if manifest.share_key_fingerprint != key_fingerprint(share_key) {
        return Err(CofferError::InvalidFormat(
            "manifest fingerprint does not match share key".into(),
        ));
    }
    Ok(manifest)
}

/// Import every file of a bundle, re-encrypting under `vault_key`.
///
/// All-or-nothing: the first integrity or decryption failure aborts the
/// import and nothing is returned.
pub fn import_bundle(
    src_dir: &Path,
    share_key: &SymmetricKey,
    vault_key: &SymmetricKey,
) -> CofferResult<Vec<ImportedEntry>> {
    let manifest = read_manifest(src_dir, share_key)?;

    let mut imported = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        // File names come from the parsed UUID, never from manifest strings.
        let bytes = fs::read(container_path(src_dir, &entry.file_id))?;

        let code = hex::decode(&entry.integrity)
            .map_err(|_| CofferError::InvalidFormat("integrity code is not hex".into()))?;
        verify_integrity(share_key, &bytes, &code)?;

        let (header, mut content) = decrypt_file(&bytes, share_key)?;
        let container = if header.file_id == entry.file_id {
            encrypt_file_with_header(&header, &content, vault_key)
        } else {
            Err(CofferError::InvalidFormat(format!(
                "container {} carries header for {}",
                entry.file_id, header.file_id
            )))
        };
        content.zeroize();

        imported.push(ImportedEntry {
            header,
            container: container?,
        });
    }

    tracing::info!(files = imported.len(), dir = %src_dir.display(), "imported bundle");
    Ok(imported)
}

fn remove_stale(path: &Path) -> CofferResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed previous bundle manifest");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn container_path(dir: &Path, file_id: &Uuid) -> PathBuf {
    dir.join(format!("{file_id}.{CONTAINER_EXT}"))
}
