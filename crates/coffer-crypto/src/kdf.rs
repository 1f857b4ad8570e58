//! Key derivation: gesture pattern / recovery phrase + device salt → vault key
//!
//! Derivation is bound to a salt that never leaves the device. The same
//! secret on another device derives an unrelated key.

use std::time::Instant;

use argon2::{Algorithm, Argon2, Params, Version};
use coffer_core::config::KdfConfig;
use coffer_core::types::KdfKind;
use coffer_core::{CofferError, CofferResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha512;
use zeroize::{Zeroize, Zeroizing};

use crate::key::SymmetricKey;
use crate::{KEY_SIZE, SALT_SIZE};

/// The per-device salt. Zeroized on drop, never transmitted.
pub struct DeviceSalt {
    bytes: [u8; SALT_SIZE],
}

impl DeviceSalt {
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

impl Drop for DeviceSalt {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DeviceSalt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSalt")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Source of the device salt, backed by hardware or the platform keychain.
///
/// Implementations create the salt on first use and must return the same
/// value on every later call on the same device. An unreachable store is
/// `HardwareUnavailable`, which callers treat as retryable.
pub trait DeviceSaltProvider: Send + Sync {
    fn device_salt(&self) -> CofferResult<DeviceSalt>;
}

/// A salt fixed at construction, for tests and offline tooling.
pub struct FixedDeviceSalt {
    bytes: [u8; SALT_SIZE],
}

impl FixedDeviceSalt {
    pub fn new(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }
}

impl Drop for FixedDeviceSalt {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl DeviceSaltProvider for FixedDeviceSalt {
    fn device_salt(&self) -> CofferResult<DeviceSalt> {
        Ok(DeviceSalt::from_bytes(self.bytes))
    }
}

/// One password-based KDF configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfAlgorithm {
    Pbkdf2Sha512 {
        iterations: u32,
    },
    Argon2id {
        /// Memory cost in KiB
        mem_cost_kib: u32,
        time_cost: u32,
        parallelism: u32,
    },
}

impl KdfAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            KdfAlgorithm::Pbkdf2Sha512 { .. } => "pbkdf2-sha512",
            KdfAlgorithm::Argon2id { .. } => "argon2id",
        }
    }

    fn derive(&self, password: &[u8], salt: &[u8]) -> CofferResult<SymmetricKey> {
        let mut key = [0u8; KEY_SIZE];
        match *self {
            KdfAlgorithm::Pbkdf2Sha512 { iterations } => {
                if iterations == 0 {
                    return Err(CofferError::KeyDerivationFailed(
                        "PBKDF2 iteration count must be > 0".into(),
                    ));
                }
                pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut key);
            }
            KdfAlgorithm::Argon2id {
                mem_cost_kib,
                time_cost,
                parallelism,
            } => {
                let params = Params::new(mem_cost_kib, time_cost, parallelism, Some(KEY_SIZE))
                    .map_err(|e| {
                        CofferError::KeyDerivationFailed(format!("invalid Argon2id params: {e}"))
                    })?;
                Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                    .hash_password_into(password, salt, &mut key)
                    .map_err(|e| CofferError::KeyDerivationFailed(format!("Argon2id: {e}")))?;
            }
        }
        let derived = SymmetricKey::from_bytes(key);
        key.zeroize();
        Ok(derived)
    }
}

/// KDF settings for both unlock paths.
///
/// The phrase path is the high-value recovery fallback and runs slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub pattern: KdfAlgorithm,
    pub phrase: KdfAlgorithm,
    pub min_pattern_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::from(&KdfConfig::default())
    }
}

impl From<&KdfConfig> for KdfParams {
    fn from(config: &KdfConfig) -> Self {
        let (pattern, phrase) = match config.algorithm {
            KdfKind::Pbkdf2Sha512 => (
                KdfAlgorithm::Pbkdf2Sha512 {
                    iterations: config.pattern_iterations,
                },
                KdfAlgorithm::Pbkdf2Sha512 {
                    iterations: config.phrase_iterations,
                },
            ),
            KdfKind::Argon2id => {
                let argon = KdfAlgorithm::Argon2id {
                    mem_cost_kib: config.argon2_mem_cost_kib,
                    time_cost: config.argon2_time_cost,
                    parallelism: config.argon2_parallelism,
                };
                (argon, argon)
            }
        };
        Self {
            pattern,
            phrase,
            min_pattern_len: config.min_pattern_len,
        }
    }
}

/// Derive the vault key from a gesture pattern.
///
/// `pattern` is the sequence of dot indices on a `grid_size × grid_size` grid.
/// Deterministic for a given pattern, grid, device salt and params, which is
/// what lets the vault re-derive its key on every unlock instead of storing it.
pub fn derive_key_from_pattern(
    pattern: &[u8],
    grid_size: u8,
    salts: &dyn DeviceSaltProvider,
    params: &KdfParams,
) -> CofferResult<SymmetricKey> {
    if pattern.len() < params.min_pattern_len {
        return Err(CofferError::InvalidPattern(format!(
            "pattern has {} dots, at least {} required",
            pattern.len(),
            params.min_pattern_len
        )));
    }
    if grid_size == 0 {
        return Err(CofferError::InvalidPattern("grid size must be > 0".into()));
    }
    let cells = u16::from(grid_size) * u16::from(grid_size);
    if let Some(bad) = pattern.iter().find(|&&dot| u16::from(dot) >= cells) {
        return Err(CofferError::InvalidPattern(format!(
            "dot {bad} outside a {grid_size}x{grid_size} grid"
        )));
    }

    let password = serialize_pattern(pattern, grid_size);
    let salt = salts.device_salt()?;

    let started = Instant::now();
    let key = params.pattern.derive(password.as_bytes(), salt.as_bytes())?;
    tracing::debug!(
        algorithm = params.pattern.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "derived vault key from pattern"
    );
    Ok(key)
}

/// Derive the vault key from a recovery phrase.
///
/// The phrase is normalized first (see [`normalize_phrase`]) so case and
/// spacing differences do not lock the user out.
pub fn derive_key_from_phrase(
    phrase: &SecretString,
    salts: &dyn DeviceSaltProvider,
    params: &KdfParams,
) -> CofferResult<SymmetricKey> {
    let normalized = Zeroizing::new(normalize_phrase(phrase.expose_secret()));
    if normalized.is_empty() {
        return Err(CofferError::InvalidPattern("recovery phrase is empty".into()));
    }

    let salt = salts.device_salt()?;

    let started = Instant::now();
    let key = params.phrase.derive(normalized.as_bytes(), salt.as_bytes())?;
    tracing::debug!(
        algorithm = params.phrase.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "derived vault key from recovery phrase"
    );
    Ok(key)
}

/// Lowercase, trim, and collapse every whitespace run to a single space.
pub fn normalize_phrase(phrase: &str) -> String {
    let mut lowered = phrase.to_lowercase();
    let normalized = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    lowered.zeroize();
    normalized
}

/// KDF password input: `g{grid}:{d0},{d1},...`. Must stay stable across releases.
fn serialize_pattern(pattern: &[u8], grid_size: u8) -> Zeroizing<String> {
    let mut out = Zeroizing::new(format!("g{grid_size}:"));
    for (i, dot) in pattern.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&dot.to_string());
    }
    out
}
