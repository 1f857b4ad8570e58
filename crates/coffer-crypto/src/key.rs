//! The vault's 256-bit symmetric key and its public fingerprint

use coffer_core::{CofferError, CofferResult};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::random::fill_random;
use crate::KEY_SIZE;

/// A 256-bit AES key.
///
/// Zeroized on drop. The engine never stores one; the caller's session owns it
/// and drops it on lock.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from an arbitrary slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CofferResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CofferError::InvalidKeySize {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(arr))
    }

    /// A fresh random key, e.g. for a share bundle.
    pub fn generate() -> CofferResult<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Non-secret identifier for this key. See [`key_fingerprint`].
    pub fn fingerprint(&self) -> String {
        key_fingerprint(self)
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// First 8 bytes of SHA-256(key), lowercase hex.
///
/// Identifies which vault a key belongs to (staging directories, bundle
/// manifests) without revealing it. 64 bits: fine for bucketing, not for
/// adversarial collision resistance.
pub fn key_fingerprint(key: &SymmetricKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}
