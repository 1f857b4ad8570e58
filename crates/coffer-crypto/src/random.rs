//! OS CSPRNG access for nonces, salts and keys

use coffer_core::{CofferError, CofferResult};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{NONCE_SIZE, SALT_SIZE};

/// Fill `buf` from the operating system's secure RNG.
///
/// Failures are reported, never retried: an entropy failure is systemic.
pub fn fill_random(buf: &mut [u8]) -> CofferResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CofferError::RandomGenerationFailed(e.to_string()))
}

/// A fresh 96-bit AEAD nonce.
pub fn random_nonce() -> CofferResult<[u8; NONCE_SIZE]> {
    let mut nonce = [0u8; NONCE_SIZE];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

/// A fresh 256-bit salt.
pub fn random_salt() -> CofferResult<[u8; SALT_SIZE]> {
    let mut salt = [0u8; SALT_SIZE];
    fill_random(&mut salt)?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonces_differ() {
        let a = random_nonce().unwrap();
        let b = random_nonce().unwrap();
        assert_ne!(a, b, "two random nonces must differ");
    }

    #[test]
    fn test_salt_not_zero() {
        let salt = random_salt().unwrap();
        assert_ne!(salt, [0u8; SALT_SIZE]);
    }

    #[test]
    fn test_fill_empty() {
        let mut empty: [u8; 0] = [];
        fill_random(&mut empty).unwrap();
    }
}
