use serde::{Deserialize, Serialize};

/// On-disk encryption format of a staged blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// `nonce || ciphertext || tag`, whole payload in one AEAD operation
    SingleShot,
    /// Chunked streaming container (`VCSE` magic)
    Streaming,
}

impl FormatKind {
    pub fn label(self) -> &'static str {
        match self {
            FormatKind::SingleShot => "single-shot",
            FormatKind::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Password-based KDF family selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfKind {
    Pbkdf2Sha512,
    Argon2id,
}

/// Where the per-device salt is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaltBackend {
    /// Platform keychain (Keychain Services, kernel keyutils, Credential Manager)
    Keychain,
    /// Permission-restricted file; the default on Linux
    File,
}
