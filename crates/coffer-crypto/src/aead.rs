//! Single-shot AES-256-GCM
//!
//! Sealed blob format ("combined" form):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use coffer_core::{CofferError, CofferResult};

use crate::key::SymmetricKey;
use crate::random::random_nonce;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` under a fresh random nonce.
///
/// Returns `[12-byte nonce][ciphertext][16-byte tag]`.
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> CofferResult<Vec<u8>> {
    let nonce = random_nonce()?;
    let ciphertext = seal_with_nonce(key, &nonce, plaintext, &[])?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`seal`].
///
/// Returns plaintext only when the tag verifies. Any verification failure is
/// the same opaque `AuthenticationFailed`.
pub fn open(sealed: &[u8], key: &SymmetricKey) -> CofferResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CofferError::InvalidFormat(format!(
            "sealed blob too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    open_with_nonce(key, &nonce, ciphertext, &[])
}

/// Encrypt with a caller-chosen nonce; returns `ciphertext || tag` only.
///
/// The caller guarantees the nonce is never reused under `key`.
pub(crate) fn seal_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> CofferResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| encrypt_error(plaintext.len()))
}

fn encrypt_error(len: usize) -> CofferError {
    CofferError::EncryptionFailed(format!("AES-GCM refused a {len}-byte plaintext"))
}

/// Inverse of [`seal_with_nonce`].
pub(crate) fn open_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> CofferResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CofferError::AuthenticationFailed)
}
