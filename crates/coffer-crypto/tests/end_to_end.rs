//! Full unlock-to-plaintext flows across module boundaries.

use coffer_core::types::FormatKind;
use coffer_core::CofferError;
use coffer_crypto::stream::{StreamHeader, STREAM_HEADER_SIZE};
use coffer_crypto::{
    decrypt_file, decrypt_staged, decrypt_streaming, derive_key_from_pattern,
    derive_key_from_phrase, encrypt_file, encrypt_for_staging, encrypt_streaming,
    export_bundle, import_bundle, is_streaming_format, read_header, sniff_format,
    EncryptedFile, FixedDeviceSalt, KdfAlgorithm, KdfParams, StagingPolicy, SymmetricKey,
};
use secrecy::SecretString;

const TEST_SALT: [u8; 32] = [0x42; 32];

fn fast_params() -> KdfParams {
    KdfParams {
        pattern: KdfAlgorithm::Pbkdf2Sha512 { iterations: 1_000 },
        phrase: KdfAlgorithm::Pbkdf2Sha512 { iterations: 1_000 },
        min_pattern_len: 6,
    }
}

fn unlock(pattern: &[u8]) -> SymmetricKey {
    derive_key_from_pattern(pattern, 4, &FixedDeviceSalt::new(TEST_SALT), &fast_params()).unwrap()
}

#[test]
fn pattern_unlock_then_container_roundtrip() {
    let key = unlock(&[1, 5, 9, 12, 8, 4]);

    let file = encrypt_file(&[0xAB, 0xCD], "a.txt", "text/plain", &key).unwrap();
    let bytes = file.to_bytes();
    let parsed = EncryptedFile::from_bytes(&bytes).unwrap();
    assert_eq!(parsed, file);

    // A fresh unlock with the same pattern opens it.
    let key_again = unlock(&[1, 5, 9, 12, 8, 4]);
    let (header, content) = decrypt_file(&parsed.to_bytes(), &key_again).unwrap();

    assert_eq!(content, [0xAB, 0xCD]);
    assert_eq!(header.original_filename, "a.txt");
    assert_eq!(header.mime_type, "text/plain");
    assert_eq!(header.original_size, 2);
    assert_eq!(read_header(&bytes, &key_again).unwrap(), header);
}

#[test]
fn different_pattern_cannot_open() {
    let file = encrypt_file(b"private", "p", "text/plain", &unlock(&[1, 5, 9, 12, 8, 4])).unwrap();
    let other = unlock(&[1, 5, 9, 12, 8, 3]);
    assert!(matches!(
        decrypt_file(&file.to_bytes(), &other),
        Err(CofferError::AuthenticationFailed)
    ));
}

#[test]
fn different_device_cannot_open() {
    let key = unlock(&[0, 1, 2, 3, 7, 11]);
    let elsewhere = derive_key_from_pattern(
        &[0, 1, 2, 3, 7, 11],
        4,
        &FixedDeviceSalt::new([0x43; 32]),
        &fast_params(),
    )
    .unwrap();
    let sealed = coffer_crypto::seal(b"bound to this device", &key).unwrap();
    assert!(coffer_crypto::open(&sealed, &elsewhere).is_err());
}

#[test]
fn streaming_three_chunk_scenario() {
    let key = unlock(&[1, 5, 9, 12, 8, 4]);
    let payload: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();

    let container = encrypt_streaming(&payload, &key, 1024).unwrap();
    let header = StreamHeader::parse(&container[..STREAM_HEADER_SIZE]).unwrap();
    assert_eq!(header.total_chunks, 3);
    assert_eq!(header.chunk_plaintext_len(0), 1024);
    assert_eq!(header.chunk_plaintext_len(1), 1024);
    assert_eq!(header.chunk_plaintext_len(2), 452);
    assert_eq!(container.len() as u64, header.encrypted_len());

    let decrypted = decrypt_streaming(&container, &key).unwrap();
    assert_eq!(decrypted.len(), 2500);
    assert_eq!(decrypted, payload);
}

#[test]
fn staged_blobs_dispatch_by_magic() {
    let key = unlock(&[3, 2, 1, 0, 4, 8]);
    let policy = StagingPolicy {
        streaming_threshold: 2048,
        chunk_size: 512,
    };

    for size in [0usize, 1, 2048, 2049, 10_000] {
        let data = vec![0x5Eu8; size];
        let blob = encrypt_for_staging(&data, &key, &policy).unwrap();
        assert_eq!(sniff_format(&blob), policy.select(size as u64), "size {size}");
        assert_eq!(is_streaming_format(&blob), size > 2048);
        assert_eq!(decrypt_staged(&blob, &key).unwrap(), data);
    }
    assert_eq!(policy.select(2049), FormatKind::Streaming);
}

#[test]
fn phrase_recovery_opens_share_bundle_on_another_vault() {
    let salts = FixedDeviceSalt::new(TEST_SALT);
    let alice = unlock(&[1, 5, 9, 12, 8, 4]);
    let bob = derive_key_from_phrase(
        &SecretString::from("Correct  Horse Battery STAPLE"),
        &salts,
        &fast_params(),
    )
    .unwrap();
    let share = SymmetricKey::generate().unwrap();

    let containers = vec![
        encrypt_file(b"holiday.jpg bytes", "holiday.jpg", "image/jpeg", &alice)
            .unwrap()
            .to_bytes(),
    ];

    let dir = tempfile::tempdir().unwrap();
    export_bundle(&containers, dir.path(), &alice, &share).unwrap();
    let imported = import_bundle(dir.path(), &share, &bob).unwrap();

    assert_eq!(imported.len(), 1);
    let (header, content) = decrypt_file(&imported[0].container.to_bytes(), &bob).unwrap();
    assert_eq!(header.original_filename, "holiday.jpg");
    assert_eq!(content, b"holiday.jpg bytes");
    assert!(decrypt_file(&imported[0].container.to_bytes(), &alice).is_err());
}
