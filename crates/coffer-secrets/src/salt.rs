//! Device salt stores
//!
//! The salt is created once per device and never exported. Losing it makes
//! every vault key on the device underivable, so neither store ever
//! overwrites an existing salt:
//! - the keychain store creates under an exclusive advisory lock, re-checks
//!   the entry once the lock is held, and returns what the keychain holds
//!   after the write rather than the bytes it generated
//! - the file store writes a complete temp file and links it into place only
//!   if no salt file exists yet

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use coffer_core::config::{expand_tilde, SecretsConfig};
use coffer_core::types::SaltBackend;
use coffer_core::{CofferError, CofferResult};
use coffer_crypto::random::random_salt;
use coffer_crypto::{DeviceSalt, DeviceSaltProvider, SALT_SIZE};
use fs2::FileExt;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::keychain::{keys, PlatformKeychain, SecretStore};

/// Build the salt store configured in `[secrets]`.
///
/// The keychain store serializes first-use creation on `<salt_file>.lock`.
pub fn open_salt_store(config: &SecretsConfig) -> Box<dyn DeviceSaltProvider> {
    let salt_file = expand_tilde(&config.salt_file);
    match config.salt_backend {
        SaltBackend::Keychain => {
            if cfg!(target_os = "linux") {
                tracing::warn!(
                    "keychain salt backend on Linux uses kernel keyutils, which does not survive a reboot"
                );
            }
            Box::new(KeychainSaltStore::new(keys::DEVICE_SALT, lock_path_for(&salt_file)))
        }
        SaltBackend::File => Box::new(FileSaltStore::new(salt_file)),
    }
}

fn lock_path_for(salt_file: &Path) -> PathBuf {
    salt_file.with_extension("lock")
}

/// Salt kept base64-encoded in the platform keychain
pub struct KeychainSaltStore {
    key_name: String,
    lock_path: PathBuf,
    backend: Arc<dyn SecretStore>,
}

impl KeychainSaltStore {
    pub fn new(key_name: impl Into<String>, lock_path: impl Into<PathBuf>) -> Self {
        Self::with_backend(key_name, lock_path, Arc::new(PlatformKeychain))
    }

    pub fn with_backend(
        key_name: impl Into<String>,
        lock_path: impl Into<PathBuf>,
        backend: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            lock_path: lock_path.into(),
            backend,
        }
    }

    fn stored(&self) -> CofferResult<Option<DeviceSalt>> {
        match self.backend.get(&self.key_name)? {
            Some(encoded) => decode_salt(&encoded).map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for KeychainSaltStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainSaltStore")
            .field("key_name", &self.key_name)
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl DeviceSaltProvider for KeychainSaltStore {
    fn device_salt(&self) -> CofferResult<DeviceSalt> {
        if let Some(salt) = self.stored()? {
            return Ok(salt);
        }

        let _lock = lock_exclusive(&self.lock_path)?;
        // Another caller may have created it while we waited for the lock.
        if let Some(salt) = self.stored()? {
            return Ok(salt);
        }

        let mut bytes = random_salt()?;
        let encoded = SecretString::from(STANDARD.encode(bytes));
        bytes.zeroize();
        self.backend.set(&self.key_name, &encoded)?;

        let salt = self.stored()?.ok_or_else(|| {
            CofferError::HardwareUnavailable(format!(
                "device salt '{}' missing right after it was stored",
                self.key_name
            ))
        })?;
        tracing::info!(key = %self.key_name, "created device salt in platform keychain");
        Ok(salt)
    }
}

/// Open (creating if needed) and exclusively lock `path`. Released on drop.
fn lock_exclusive(path: &Path) -> CofferResult<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| unavailable(parent, e))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| unavailable(path, e))?;
    file.lock_exclusive().map_err(|e| unavailable(path, e))?;
    Ok(file)
}

/// Salt kept as 32 raw bytes in a file readable only by the owner
#[derive(Debug, Clone)]
pub struct FileSaltStore {
    path: PathBuf,
}

impl FileSaltStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing(&self) -> CofferResult<Option<DeviceSalt>> {
        let mut file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&self.path, e)),
        };
        let mut raw = Vec::with_capacity(SALT_SIZE);
        file.read_to_end(&mut raw)
            .map_err(|e| unavailable(&self.path, e))?;

        let salt = salt_from_slice(&raw);
        raw.zeroize();
        salt.map(Some).ok_or_else(|| {
            CofferError::KeyDerivationFailed(format!(
                "device salt file {} is malformed",
                self.path.display()
            ))
        })
    }

    /// Write a fresh salt unless one already exists. `None` when another
    /// process got there first.
    fn create(&self) -> CofferResult<Option<DeviceSalt>> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| unavailable(dir, e))?;

        // Temp files are created 0600 on unix.
        let mut tmp = tempfile::Builder::new()
            .prefix(".device-salt-")
            .tempfile_in(dir)
            .map_err(|e| unavailable(dir, e))?;

        let mut bytes = random_salt()?;
        let written = tmp
            .as_file_mut()
            .write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all());
        let salt = DeviceSalt::from_bytes(bytes);
        bytes.zeroize();
        written.map_err(|e| unavailable(&self.path, e))?;

        match tmp.persist_noclobber(&self.path) {
            Ok(_) => {
                tracing::info!(path = %self.path.display(), "created device salt file");
                Ok(Some(salt))
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(unavailable(&self.path, e.error)),
        }
    }
}

impl DeviceSaltProvider for FileSaltStore {
    fn device_salt(&self) -> CofferResult<DeviceSalt> {
        if let Some(salt) = self.read_existing()? {
            return Ok(salt);
        }
        if let Some(salt) = self.create()? {
            return Ok(salt);
        }
        self.read_existing()?.ok_or_else(|| {
            CofferError::HardwareUnavailable(format!(
                "device salt file {} vanished during creation",
                self.path.display()
            ))
        })
    }
}

fn decode_salt(encoded: &SecretString) -> CofferResult<DeviceSalt> {
    let mut raw = STANDARD
        .decode(encoded.expose_secret())
        .map_err(|_| CofferError::KeyDerivationFailed("stored device salt is not base64".into()))?;
    let salt = salt_from_slice(&raw);
    raw.zeroize();
    salt.ok_or_else(|| {
        CofferError::KeyDerivationFailed(format!("stored device salt is not {SALT_SIZE} bytes"))
    })
}

fn salt_from_slice(raw: &[u8]) -> Option<DeviceSalt> {
    let bytes: [u8; SALT_SIZE] = raw.try_into().ok()?;
    Some(DeviceSalt::from_bytes(bytes))
}

fn unavailable(path: &Path, e: io::Error) -> CofferError {
    CofferError::HardwareUnavailable(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    /// In-memory keychain. Reads are slow so racing creators overlap.
    #[derive(Default)]
    struct MemoryKeychain {
        entries: Mutex<HashMap<String, String>>,
        writes: AtomicUsize,
    }

    impl SecretStore for MemoryKeychain {
        fn get(&self, key_name: &str) -> CofferResult<Option<SecretString>> {
            thread::sleep(Duration::from_millis(2));
            let entries = self.entries.lock().unwrap();
            Ok(entries.get(key_name).cloned().map(SecretString::from))
        }

        fn set(&self, key_name: &str, secret: &SecretString) -> CofferResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.entries
                .lock()
                .unwrap()
                .insert(key_name.to_string(), secret.expose_secret().to_string());
            Ok(())
        }
    }

    /// Keychain where every write is immediately replaced by another
    /// process's value.
    struct OverwrittenKeychain {
        inner: MemoryKeychain,
        winner: String,
    }

    impl SecretStore for OverwrittenKeychain {
        fn get(&self, key_name: &str) -> CofferResult<Option<SecretString>> {
            self.inner.get(key_name)
        }

        fn set(&self, key_name: &str, _secret: &SecretString) -> CofferResult<()> {
            self.inner.set(key_name, &SecretString::from(self.winner.clone()))
        }
    }

    #[test]
    fn test_keychain_concurrent_first_use_agrees() {
        const CALLERS: usize = 8;
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("device-salt.lock");
        let backend = Arc::new(MemoryKeychain::default());
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let store = KeychainSaltStore::with_backend(
                    keys::DEVICE_SALT,
                    lock_path.clone(),
                    backend.clone(),
                );
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    *store.device_salt().unwrap().as_bytes()
                })
            })
            .collect();
        let salts: Vec<[u8; SALT_SIZE]> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = KeychainSaltStore::with_backend(keys::DEVICE_SALT, &lock_path, backend.clone())
            .device_salt()
            .unwrap();
        assert!(salts.iter().all(|s| s == stored.as_bytes()));
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keychain_existing_salt_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryKeychain::default());
        backend
            .set(keys::DEVICE_SALT, &SecretString::from(STANDARD.encode([5u8; SALT_SIZE])))
            .unwrap();

        let store = KeychainSaltStore::with_backend(
            keys::DEVICE_SALT,
            dir.path().join("salt.lock"),
            backend.clone(),
        );
        assert_eq!(store.device_salt().unwrap().as_bytes(), &[5u8; SALT_SIZE]);
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keychain_adopts_stored_value_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(OverwrittenKeychain {
            inner: MemoryKeychain::default(),
            winner: STANDARD.encode([8u8; SALT_SIZE]),
        });
        let store = KeychainSaltStore::with_backend(keys::DEVICE_SALT, dir.path().join("l"), backend);
        assert_eq!(store.device_salt().unwrap().as_bytes(), &[8u8; SALT_SIZE]);
    }

    #[test]
    fn test_keychain_corrupt_entry_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryKeychain::default());
        backend.set(keys::DEVICE_SALT, &SecretString::from("not base64 !!")).unwrap();

        let store = KeychainSaltStore::with_backend(keys::DEVICE_SALT, dir.path().join("l"), backend.clone());
        assert!(matches!(store.device_salt(), Err(CofferError::KeyDerivationFailed(_))));
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_store_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSaltStore::new(dir.path().join("nested/device-salt"));

        let first = store.device_salt().unwrap();
        let second = store.device_salt().unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(fs::read(store.path()).unwrap(), first.as_bytes());
    }

    #[test]
    fn test_file_store_concurrent_first_use_agrees() {
        const CALLERS: usize = 8;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device-salt");
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let store = FileSaltStore::new(&path);
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    *store.device_salt().unwrap().as_bytes()
                })
            })
            .collect();
        let salts: Vec<[u8; SALT_SIZE]> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let on_disk = fs::read(&path).unwrap();
        assert!(salts.iter().all(|s| s[..] == on_disk[..]));
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "only the salt file remains");
    }

    #[test]
    fn test_file_store_reads_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salt");
        fs::write(&path, [9u8; SALT_SIZE]).unwrap();

        let salt = FileSaltStore::new(&path).device_salt().unwrap();
        assert_eq!(salt.as_bytes(), &[9u8; SALT_SIZE]);
    }

    #[test]
    fn test_file_store_never_overwrites_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salt");
        fs::write(&path, b"short").unwrap();

        let result = FileSaltStore::new(&path).device_salt();
        assert!(matches!(result, Err(CofferError::KeyDerivationFailed(_))));
        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn test_distinct_devices_get_distinct_salts() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileSaltStore::new(dir.path().join("a")).device_salt().unwrap();
        let b = FileSaltStore::new(dir.path().join("b")).device_salt().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileSaltStore::new(dir.path().join("salt"));
        store.device_salt().unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_open_salt_store_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecretsConfig {
            salt_backend: SaltBackend::File,
            salt_file: dir.path().join("salt"),
        };
        let store = open_salt_store(&config);
        let salt = store.device_salt().unwrap();
        assert_eq!(fs::read(dir.path().join("salt")).unwrap(), salt.as_bytes());
    }

    #[test]
    fn test_lock_path_beside_salt_file() {
        assert_eq!(
            lock_path_for(Path::new("/home/u/.config/coffer/device-salt")),
            PathBuf::from("/home/u/.config/coffer/device-salt.lock")
        );
    }

    #[test]
    fn test_decode_salt() {
        let encoded = SecretString::from(STANDARD.encode([4u8; SALT_SIZE]));
        assert_eq!(decode_salt(&encoded).unwrap().as_bytes(), &[4u8; SALT_SIZE]);

        let short = SecretString::from(STANDARD.encode([4u8; 16]));
        assert!(matches!(decode_salt(&short), Err(CofferError::KeyDerivationFailed(_))));

        let garbage = SecretString::from("not base64 !!");
        assert!(matches!(decode_salt(&garbage), Err(CofferError::KeyDerivationFailed(_))));
    }
}
