//! coffer-crypto: the vault's cryptographic storage engine
//!
//! Key derivation:
//! ```text
//! gesture pattern / recovery phrase
//!   + device salt (32 bytes, platform keychain)
//!   └── PBKDF2-HMAC-SHA512 (600k / 800k iterations) or Argon2id
//!         └── SymmetricKey (256-bit, held by the caller's session)
//! ```
//!
//! Formats (all AES-256-GCM, 96-bit nonces, 128-bit tags):
//! ```text
//! single-shot:  nonce[12] || ciphertext || tag[16]
//! container:    header_len u32 LE || seal(header[256]) || seal(content)
//! streaming:    "VCSE" | v1 | chunk_size | total_chunks | original_size | base_nonce[12]
//!               then per chunk: len u32 || ciphertext || tag   (AAD = header)
//! ```
//!
//! Every call is synchronous and owns its own nonces, buffers and handles;
//! only the key and configuration are shared between concurrent callers.

pub mod aead;
pub mod container;
pub mod dispatch;
pub mod header;
pub mod integrity;
pub mod kdf;
pub mod key;
pub mod random;
pub mod share;
pub mod staging;
pub mod stream;

pub use aead::{open, seal};
pub use container::{decrypt_file, encrypt_file, read_header, EncryptedFile};
pub use dispatch::{decrypt_staged, encrypt_for_staging, is_streaming_format, sniff_format, StagingPolicy};
pub use header::EncryptedFileHeader;
pub use integrity::{integrity_code, verify_integrity};
pub use kdf::{
    derive_key_from_pattern, derive_key_from_phrase, DeviceSalt, DeviceSaltProvider,
    FixedDeviceSalt, KdfAlgorithm, KdfParams,
};
pub use key::{key_fingerprint, SymmetricKey};
pub use share::{export_bundle, import_bundle, reencrypt_file, ImportedEntry};
pub use staging::{stage_batch, stage_file, staging_dir, unstage_file, StageJob, StagedFile};
pub use stream::{
    decrypt_stream, decrypt_streaming, encrypt_stream, encrypt_streaming, StreamControl,
    StreamHeader,
};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the per-device salt
pub const SALT_SIZE: usize = 32;
