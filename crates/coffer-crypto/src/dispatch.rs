//! Single-shot vs streaming selection and detection
//!
//! Detection is a heuristic over the first 4 bytes: single-shot output starts
//! with a random nonce, so about one blob in 2^32 begins with the streaming
//! magic and is then rejected as a malformed streaming container. Nothing is
//! ever decrypted under the wrong format.

use coffer_core::config::StagingConfig;
use coffer_core::types::FormatKind;
use coffer_core::CofferResult;

use crate::aead::{open, seal};
use crate::key::SymmetricKey;
use crate::stream::{decrypt_streaming, encrypt_streaming, STREAM_MAGIC};

/// True when `data` begins with the streaming container magic.
pub fn is_streaming_format(data: &[u8]) -> bool {
    data.len() >= STREAM_MAGIC.len() && data[..STREAM_MAGIC.len()] == STREAM_MAGIC
}

pub fn sniff_format(data: &[u8]) -> FormatKind {
    if is_streaming_format(data) {
        FormatKind::Streaming
    } else {
        FormatKind::SingleShot
    }
}

/// Size threshold and chunk geometry for new staged blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingPolicy {
    /// Payloads strictly larger than this use the streaming format.
    pub streaming_threshold: u64,
    pub chunk_size: u32,
}

impl StagingPolicy {
    pub fn select(&self, size: u64) -> FormatKind {
        if size <= self.streaming_threshold {
            FormatKind::SingleShot
        } else {
            FormatKind::Streaming
        }
    }
}

impl Default for StagingPolicy {
    fn default() -> Self {
        Self::from(&StagingConfig::default())
    }
}

impl From<&StagingConfig> for StagingPolicy {
    fn from(config: &StagingConfig) -> Self {
        Self {
            streaming_threshold: config.streaming_threshold_bytes,
            chunk_size: config.chunk_size_bytes,
        }
    }
}

/// Encrypt an in-memory payload in whichever format `policy` selects.
pub fn encrypt_for_staging(data: &[u8], key: &SymmetricKey, policy: &StagingPolicy) -> CofferResult<Vec<u8>> {
    let format = policy.select(data.len() as u64);
    tracing::debug!(%format, size = data.len(), "staging payload");
    match format {
        FormatKind::SingleShot => seal(data, key),
        FormatKind::Streaming => encrypt_streaming(data, key, policy.chunk_size),
    }
}

/// Decrypt a staged blob of either format.
pub fn decrypt_staged(data: &[u8], key: &SymmetricKey) -> CofferResult<Vec<u8>> {
    match sniff_format(data) {
        FormatKind::Streaming => decrypt_streaming(data, key),
        FormatKind::SingleShot => open(data, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;
    use coffer_core::CofferError;

    fn test_key() -> SymmetricKey {
        SymmetricKey::from_bytes([0x5Au8; KEY_SIZE])
    }

    fn small_policy() -> StagingPolicy {
        StagingPolicy {
            streaming_threshold: 1024,
            chunk_size: 256,
        }
    }

    #[test]
    fn test_policy_boundary() {
        let policy = small_policy();
        assert_eq!(policy.select(0), FormatKind::SingleShot);
        assert_eq!(policy.select(1024), FormatKind::SingleShot);
        assert_eq!(policy.select(1025), FormatKind::Streaming);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = StagingPolicy::default();
        assert_eq!(policy.streaming_threshold, 50 * 1024 * 1024);
        assert_eq!(policy.chunk_size, 1024 * 1024);
    }

    #[test]
    fn test_streaming_output_detected() {
        let key = test_key();
        for size in [0usize, 1, 255, 256, 2000] {
            let blob = encrypt_streaming(&vec![1u8; size], &key, 256).unwrap();
            assert!(is_streaming_format(&blob), "size {size}");
            assert_eq!(sniff_format(&blob), FormatKind::Streaming);
        }
    }

    #[test]
    fn test_single_shot_output_not_detected() {
        let key = test_key();
        for i in 0..200u32 {
            let blob = seal(&i.to_le_bytes(), &key).unwrap();
            assert!(!is_streaming_format(&blob));
        }
    }

    #[test]
    fn test_short_input_is_single_shot() {
        assert!(!is_streaming_format(b""));
        assert!(!is_streaming_format(b"VCS"));
        assert!(is_streaming_format(b"VCSE"));
    }

    #[test]
    fn test_staging_roundtrip_both_formats() {
        let key = test_key();
        let policy = small_policy();

        let small = vec![7u8; 1000];
        let blob = encrypt_for_staging(&small, &key, &policy).unwrap();
        assert_eq!(sniff_format(&blob), FormatKind::SingleShot);
        assert_eq!(decrypt_staged(&blob, &key).unwrap(), small);

        let large = (0..5000u32).map(|i| i as u8).collect::<Vec<_>>();
        let blob = encrypt_for_staging(&large, &key, &policy).unwrap();
        assert_eq!(sniff_format(&blob), FormatKind::Streaming);
        assert_eq!(decrypt_staged(&blob, &key).unwrap(), large);
    }

    #[test]
    fn test_single_shot_with_magic_prefix_fails_cleanly() {
        // The collision case: a blob that is not a streaming container but
        // starts with the magic must be rejected, not misdecrypted.
        let key = test_key();
        let mut blob = seal(b"unlucky nonce", &key).unwrap();
        blob[..4].copy_from_slice(&STREAM_MAGIC);
        let err = decrypt_staged(&blob, &key).unwrap_err();
        assert!(err.is_corruption(), "got {err}");
        assert!(matches!(
            err,
            CofferError::InvalidFormat(_) | CofferError::AuthenticationFailed
        ));
    }
}
