//! Platform keychain access via the `keyring` crate:
//! - macOS: Keychain Services
//! - Linux: kernel keyutils (memory-only, lost on reboot; the file backend is the Linux default)
//! - Windows: Credential Manager
//!
//! Every failure other than a missing entry is `HardwareUnavailable`.

use coffer_core::{CofferError, CofferResult};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

const SERVICE_NAME: &str = "coffer";

/// Named secret storage. Implemented by the platform keychain; tests swap in
/// an in-memory store.
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret, `None` if the entry does not exist.
    fn get(&self, key_name: &str) -> CofferResult<Option<SecretString>>;

    /// Store a secret under `key_name`, replacing any previous value.
    fn set(&self, key_name: &str, secret: &SecretString) -> CofferResult<()>;
}

/// The OS keychain under service `coffer`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformKeychain;

impl SecretStore for PlatformKeychain {
    fn get(&self, key_name: &str) -> CofferResult<Option<SecretString>> {
        match entry(key_name)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(unavailable("get", key_name, e)),
        }
    }

    fn set(&self, key_name: &str, secret: &SecretString) -> CofferResult<()> {
        entry(key_name)?
            .set_password(secret.expose_secret())
            .map_err(|e| unavailable("store", key_name, e))?;
        tracing::debug!(key = key_name, "stored secret in platform keychain");
        Ok(())
    }
}

fn entry(key_name: &str) -> CofferResult<keyring::Entry> {
    keyring::Entry::new(SERVICE_NAME, key_name).map_err(|e| unavailable("entry", key_name, e))
}

fn unavailable(op: &str, key_name: &str, e: keyring::Error) -> CofferError {
    CofferError::HardwareUnavailable(format!("keychain {op} for '{key_name}': {e}"))
}

/// Well-known keychain entry names
pub mod keys {
    /// The per-device KDF salt (base64)
    pub const DEVICE_SALT: &str = "device-salt";
}
