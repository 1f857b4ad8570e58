//! coffer-secrets: where the per-device salt lives
//!
//! Backends, selected by `[secrets] salt_backend`:
//!   - `keychain`: platform keychain entry under service `coffer`
//!   - `file`: 0600 file; the default on Linux, where the keychain does not
//!     survive a reboot
//!
//! Both create the salt on first use and return the same bytes afterwards.

pub mod keychain;
pub mod salt;

pub use keychain::{PlatformKeychain, SecretStore};
pub use salt::{open_salt_store, FileSaltStore, KeychainSaltStore};
