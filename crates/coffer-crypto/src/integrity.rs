//! Keyed integrity codes for data handled outside a sealed container
//!
//! The MAC key is an HKDF-SHA256 subkey of the vault key, so a code never
//! shares key material with the AES-GCM layer.

use coffer_core::{CofferError, CofferResult};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::key::SymmetricKey;
use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

const INTEGRITY_INFO: &[u8] = b"coffer-integrity";

/// Length of an integrity code in bytes.
pub const CODE_SIZE: usize = 32;

/// HMAC-SHA256 of `data` under the integrity subkey of `key`.
pub fn integrity_code(key: &SymmetricKey, data: &[u8]) -> CofferResult<[u8; CODE_SIZE]> {
    let mac = keyed_mac(key, data)?;
    Ok(mac.finalize().into_bytes().into())
}

/// Check `code` against `data` in constant time.
pub fn verify_integrity(key: &SymmetricKey, data: &[u8], code: &[u8]) -> CofferResult<()> {
    keyed_mac(key, data)?
        .verify_slice(code)
        .map_err(|_| CofferError::AuthenticationFailed)
}

fn keyed_mac(key: &SymmetricKey, data: &[u8]) -> CofferResult<HmacSha256> {
    let hkdf = Hkdf::<Sha256>::new(None, key.as_bytes());
    let mut subkey = [0u8; KEY_SIZE];
    hkdf.expand(INTEGRITY_INFO, &mut subkey)
        .map_err(|e| CofferError::KeyDerivationFailed(format!("HKDF expand: {e}")))?;

    let mac = HmacSha256::new_from_slice(&subkey)
        .map_err(|e| CofferError::KeyDerivationFailed(format!("HMAC key: {e}")));
    subkey.zeroize();

    let mut mac = mac?;
    mac.update(data);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([b; KEY_SIZE])
    }

    #[test]
    fn test_code_deterministic() {
        let a = integrity_code(&key(1), b"manifest").unwrap();
        let b = integrity_code(&key(1), b"manifest").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_code_depends_on_key_and_data() {
        let base = integrity_code(&key(1), b"manifest").unwrap();
        assert_ne!(base, integrity_code(&key(2), b"manifest").unwrap());
        assert_ne!(base, integrity_code(&key(1), b"manifesT").unwrap());
    }

    #[test]
    fn test_code_is_not_plain_hmac_of_vault_key() {
        let k = key(7);
        let mut plain = HmacSha256::new_from_slice(k.as_bytes()).unwrap();
        plain.update(b"data");
        let plain: [u8; 32] = plain.finalize().into_bytes().into();
        assert_ne!(integrity_code(&k, b"data").unwrap(), plain);
    }

    #[test]
    fn test_verify_accepts_and_rejects() {
        let k = key(9);
        let code = integrity_code(&k, b"payload").unwrap();
        verify_integrity(&k, b"payload", &code).unwrap();

        let mut bad = code;
        bad[31] ^= 1;
        assert!(matches!(
            verify_integrity(&k, b"payload", &bad),
            Err(CofferError::AuthenticationFailed)
        ));
        assert!(matches!(
            verify_integrity(&k, b"payload", &code[..16]),
            Err(CofferError::AuthenticationFailed)
        ));
        assert!(verify_integrity(&key(10), b"payload", &code).is_err());
    }
}
