use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CofferError, CofferResult};
use crate::types::{KdfKind, SaltBackend};

/// Largest streaming chunk: the sealed chunk (plaintext + 16-byte tag) must
/// fit a u32 length prefix.
pub const MAX_CHUNK_SIZE_BYTES: u32 = u32::MAX - 16;

/// Top-level configuration (loaded from coffer.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CofferConfig {
    pub kdf: KdfConfig,
    pub staging: StagingConfig,
    pub secrets: SecretsConfig,
    pub log: LogConfig,
}

impl CofferConfig {
    /// Reject settings that would make the engine unusable.
    pub fn validate(&self) -> CofferResult<()> {
        if self.staging.chunk_size_bytes == 0 {
            return Err(CofferError::Config("staging.chunk_size_bytes must be > 0".into()));
        }
        if self.staging.chunk_size_bytes > MAX_CHUNK_SIZE_BYTES {
            return Err(CofferError::Config(format!(
                "staging.chunk_size_bytes must be <= {MAX_CHUNK_SIZE_BYTES}"
            )));
        }
        if self.kdf.algorithm == KdfKind::Pbkdf2Sha512
            && (self.kdf.pattern_iterations == 0 || self.kdf.phrase_iterations == 0)
        {
            return Err(CofferError::Config("kdf iterations must be > 0".into()));
        }
        if self.kdf.algorithm == KdfKind::Argon2id
            && (self.kdf.argon2_time_cost == 0 || self.kdf.argon2_parallelism == 0)
        {
            return Err(CofferError::Config(
                "argon2 time cost and parallelism must be > 0".into(),
            ));
        }
        if self.kdf.pattern_iterations < 100_000 && self.kdf.algorithm == KdfKind::Pbkdf2Sha512 {
            tracing::warn!(
                iterations = self.kdf.pattern_iterations,
                "pattern KDF iteration count is very low"
            );
        }
        Ok(())
    }
}

/// Key derivation settings
///
/// Iteration counts are tuned against target hardware; recalibrate so a
/// derivation takes at least 250ms on the slowest supported device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// KDF family: "pbkdf2-sha512" (default) or "argon2id"
    pub algorithm: KdfKind,
    /// PBKDF2 iterations for gesture patterns (default: 600000)
    pub pattern_iterations: u32,
    /// PBKDF2 iterations for recovery phrases (default: 800000)
    pub phrase_iterations: u32,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Minimum number of dots in a gesture pattern (default: 6)
    pub min_pattern_len: usize,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: KdfKind::Pbkdf2Sha512,
            pattern_iterations: 600_000,
            phrase_iterations: 800_000,
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            min_pattern_len: 6,
        }
    }
}

/// Staging (encrypt-at-import) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Files larger than this use the streaming container (default: 50 MiB)
    pub streaming_threshold_bytes: u64,
    /// Plaintext bytes per streaming chunk (default: 1 MiB)
    pub chunk_size_bytes: u32,
    /// Root directory for per-vault staging areas
    pub root: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            streaming_threshold_bytes: 50 * 1024 * 1024,
            chunk_size_bytes: 1024 * 1024,
            root: PathBuf::from("~/.local/share/coffer/staging"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Device salt store: "keychain" or "file" (default: "file" on Linux,
    /// "keychain" elsewhere)
    pub salt_backend: SaltBackend,
    /// Salt file path when `salt_backend = "file"`
    pub salt_file: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            salt_backend: default_salt_backend(),
            salt_file: PathBuf::from("~/.config/coffer/device-salt"),
        }
    }
}

/// Linux's keyring backend is kernel keyutils, which is memory-only and loses
/// the salt on reboot; the file store is the only persistent default there.
pub fn default_salt_backend() -> SaltBackend {
    if cfg!(target_os = "linux") {
        SaltBackend::File
    } else {
        SaltBackend::Keychain
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[kdf]
algorithm = "argon2id"
pattern_iterations = 700000
phrase_iterations = 900000
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 2
min_pattern_len = 8

[staging]
streaming_threshold_bytes = 1048576
chunk_size_bytes = 65536
root = "/var/lib/coffer/staging"

[secrets]
salt_backend = "file"
salt_file = "/var/lib/coffer/salt"

[log]
level = "debug"
format = "json"
"#;
        let config: CofferConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.kdf.algorithm, KdfKind::Argon2id);
        assert_eq!(config.kdf.pattern_iterations, 700_000);
        assert_eq!(config.kdf.argon2_mem_cost_kib, 131072);
        assert_eq!(config.kdf.min_pattern_len, 8);
        assert_eq!(config.staging.streaming_threshold_bytes, 1_048_576);
        assert_eq!(config.staging.chunk_size_bytes, 65536);
        assert_eq!(config.staging.root, PathBuf::from("/var/lib/coffer/staging"));
        assert_eq!(config.secrets.salt_backend, SaltBackend::File);
        assert_eq!(config.log.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: CofferConfig = toml::from_str("").unwrap();

        assert_eq!(config.kdf.algorithm, KdfKind::Pbkdf2Sha512);
        assert_eq!(config.kdf.pattern_iterations, 600_000);
        assert_eq!(config.kdf.phrase_iterations, 800_000);
        assert_eq!(config.kdf.min_pattern_len, 6);
        assert_eq!(config.staging.streaming_threshold_bytes, 50 * 1024 * 1024);
        assert_eq!(config.staging.chunk_size_bytes, 1024 * 1024);
        assert_eq!(config.secrets.salt_backend, default_salt_backend());
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_default_salt_backend_persists_on_linux() {
        let backend = SecretsConfig::default().salt_backend;
        if cfg!(target_os = "linux") {
            assert_eq!(backend, SaltBackend::File);
        } else {
            assert_eq!(backend, SaltBackend::Keychain);
        }

        // An explicit choice still wins over the platform default.
        let config: CofferConfig = toml::from_str("[secrets]\nsalt_backend = \"keychain\"").unwrap();
        assert_eq!(config.secrets.salt_backend, SaltBackend::Keychain);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[staging]
chunk_size_bytes = 4096
"#;
        let config: CofferConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.staging.chunk_size_bytes, 4096);
        // Defaults
        assert_eq!(config.staging.streaming_threshold_bytes, 50 * 1024 * 1024);
        assert_eq!(config.kdf.pattern_iterations, 600_000);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = CofferConfig::default();
        config.staging.chunk_size_bytes = 0;
        assert!(matches!(config.validate(), Err(CofferError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_chunk_size() {
        let mut config = CofferConfig::default();
        config.staging.chunk_size_bytes = u32::MAX;
        assert!(matches!(config.validate(), Err(CofferError::Config(_))));

        config.staging.chunk_size_bytes = MAX_CHUNK_SIZE_BYTES;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut config = CofferConfig::default();
        config.kdf.phrase_iterations = 0;
        assert!(matches!(config.validate(), Err(CofferError::Config(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CofferConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CofferConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.kdf.pattern_iterations, parsed.kdf.pattern_iterations);
        assert_eq!(config.staging.root, parsed.staging.root);
        assert_eq!(config.secrets.salt_file, parsed.secrets.salt_file);
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        let expanded = expand_tilde(std::path::Path::new("~/.config/coffer"));
        assert_eq!(expanded, PathBuf::from(home).join(".config/coffer"));

        let absolute = expand_tilde(std::path::Path::new("/etc/coffer"));
        assert_eq!(absolute, PathBuf::from("/etc/coffer"));
    }
}
