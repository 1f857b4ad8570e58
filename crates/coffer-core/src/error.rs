use thiserror::Error;

pub type CofferResult<T> = Result<T, CofferError>;

/// Failures surfaced by the vault engine.
///
/// Variants carry structural detail only. Nothing derived from key material or
/// plaintext ever ends up in a message.
#[derive(Debug, Error)]
pub enum CofferError {
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("secure random generation failed: {0}")]
    RandomGenerationFailed(String),

    /// Tag verification failed. Deliberately carries no detail.
    #[error("file is corrupted or key is wrong")]
    AuthenticationFailed,

    /// The cipher refused to seal, e.g. a plaintext beyond the AES-GCM length limit.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("secure key store unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CofferError {
    /// Data is unreadable with this key: tampered, truncated, or the wrong vault.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CofferError::AuthenticationFailed | CofferError::InvalidFormat(_)
        )
    }

    /// Transient failure; the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CofferError::HardwareUnavailable(_) | CofferError::Cancelled)
    }

    /// Fixed by asking the user again (re-draw the pattern, re-type the phrase).
    pub fn is_user_recoverable(&self) -> bool {
        matches!(self, CofferError::InvalidPattern(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_failure_is_opaque() {
        let msg = CofferError::AuthenticationFailed.to_string();
        assert_eq!(msg, "file is corrupted or key is wrong");
    }

    #[test]
    fn test_classification() {
        assert!(CofferError::AuthenticationFailed.is_corruption());
        assert!(CofferError::InvalidFormat("bad magic".into()).is_corruption());
        assert!(!CofferError::HardwareUnavailable("locked".into()).is_corruption());
        assert!(!CofferError::EncryptionFailed("too long".into()).is_corruption());

        assert!(CofferError::HardwareUnavailable("locked".into()).is_retryable());
        assert!(!CofferError::KeyDerivationFailed("x".into()).is_retryable());

        assert!(CofferError::InvalidPattern("too short".into()).is_user_recoverable());
        assert!(!CofferError::InvalidKeySize { expected: 32, actual: 16 }.is_user_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: CofferError = io.into();
        assert!(matches!(err, CofferError::Io(_)));
    }
}
