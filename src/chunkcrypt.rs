//! Chunked authenticated encryption using PBKDF2 + AES-256-GCM
//!
//! Each chunk is sealed independently under one payload-scoped key with a
//! fresh 12-byte random nonce. The associated data for chunk `i` of `n` is
//! the UTF-8 literal `chunk:<i>/<n>`, which cryptographically binds every
//! chunk to its position and to the payload's total chunk count. An attacker
//! who can rewrite storage cannot reorder, duplicate, truncate, or splice
//! chunks between payloads without tripping tag verification.
//!
//! The legacy version 1 format seals the whole document in one AEAD call
//! with no associated data; it is supported for decode and for producing
//! compatibility output, never mixed with the chunked format.

use aes_gcm::aead::{Aead, KeyInit, Payload as AeadPayload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, Result, ShardboxError};
use crate::kdf::{self, AccessKey, KeyPurpose, SEED_LEN};
use crate::payload::{
    ChunkRecord, ChunkedPayload, FORMAT_VERSION, LEGACY_VERSION, LegacyPayload, Payload,
    decode_b64, encode_b64,
};

/// Length of the AES-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Associated data binding a chunk to `(index, total)`.
fn chunk_aad(index: usize, total: usize) -> Vec<u8> {
    format!("chunk:{index}/{total}").into_bytes()
}

fn cipher_for(key: &AccessKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::CipherUnavailable,
            "AES-256-GCM cipher could not be initialized",
            e,
        )
    })
}

fn authentication_failed() -> ShardboxError {
    ShardboxError::with_kind(
        ErrorCategory::User,
        ErrorKind::AuthenticationFailed,
        "corrupt input, tampered-with data, or bad passphrase",
    )
}

/// Seal one chunk's plaintext as chunk `index` of `total`.
///
/// A fresh random nonce is generated per call. The caller's plaintext buffer
/// is treated as sensitive and is not retained.
pub fn encode_chunk(
    plaintext: &[u8],
    key: &AccessKey,
    index: usize,
    total: usize,
) -> Result<ChunkRecord> {
    key.require(KeyPurpose::Encrypt)?;
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = chunk_aad(index, total);
    let ciphertext = cipher
        .encrypt(
            nonce,
            AeadPayload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| {
            ShardboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "chunk encryption failed",
            )
        })?;

    Ok(ChunkRecord {
        offset: encode_b64(&nonce_bytes),
        payload: encode_b64(&ciphertext),
    })
}

/// Open one chunk record, asserting it was sealed as chunk `index` of `total`.
///
/// Any mismatch between the record's actual binding and the supplied
/// position, and any bit-level tamper of nonce or ciphertext, surfaces as an
/// authentication failure. There is no partial-success mode.
pub fn decode_chunk(
    record: &ChunkRecord,
    key: &AccessKey,
    index: usize,
    total: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    key.require(KeyPurpose::Decrypt)?;

    let nonce_bytes = decode_b64(&record.offset, "chunk nonce")?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(ShardboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::BinaryFormat,
            format!(
                "chunk nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            ),
        ));
    }
    let ciphertext = decode_b64(&record.payload, "chunk ciphertext")?;

    let cipher = cipher_for(key)?;
    let aad = chunk_aad(index, total);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            AeadPayload {
                msg: ciphertext.as_slice(),
                aad: &aad,
            },
        )
        .map_err(|_| authentication_failed())?;

    Ok(Zeroizing::new(plaintext))
}

/// Seal a sequence of plaintext chunks into a complete version 2 payload.
///
/// Generates a fresh 16-byte seed, derives the encrypt-only key once, and
/// seals every chunk with its positional binding.
pub fn encode_chunks<T: AsRef<[u8]>>(plaintexts: &[T], passphrase: &[u8]) -> Result<Payload> {
    if plaintexts.is_empty() {
        return Err(ShardboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::PayloadInvalid,
            "refusing to encode a payload with no chunks",
        ));
    }

    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    let key = kdf::derive_access_key(passphrase, &seed, KeyPurpose::Encrypt)?;

    let total = plaintexts.len();
    let mut chunks = Vec::with_capacity(total);
    for (index, plaintext) in plaintexts.iter().enumerate() {
        chunks.push(encode_chunk(plaintext.as_ref(), &key, index, total)?);
    }

    Ok(Payload::Chunked(ChunkedPayload {
        version: FORMAT_VERSION,
        seed: encode_b64(&seed),
        chunks,
    }))
}

/// Seal a whole document as a legacy version 1 payload (single AEAD call,
/// no associated data).
pub fn encode_legacy(plaintext: &[u8], passphrase: &[u8]) -> Result<Payload> {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    let key = kdf::derive_access_key(passphrase, &seed, KeyPurpose::Encrypt)?;
    let cipher = cipher_for(&key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| {
            ShardboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "legacy encryption failed",
            )
        })?;

    Ok(Payload::Legacy(LegacyPayload {
        version: LEGACY_VERSION,
        seed: encode_b64(&seed),
        offset: encode_b64(&nonce_bytes),
        payload: encode_b64(&ciphertext),
    }))
}

/// Open a legacy version 1 payload.
pub fn decode_legacy(payload: &LegacyPayload, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let seed = decode_b64(&payload.seed, "seed")?;
    let nonce_bytes = decode_b64(&payload.offset, "nonce")?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(ShardboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::BinaryFormat,
            format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            ),
        ));
    }
    let ciphertext = decode_b64(&payload.payload, "sealed data")?;

    let key = kdf::derive_access_key(passphrase, &seed, KeyPurpose::Decrypt)?;
    let cipher = cipher_for(&key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| authentication_failed())?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(purpose: KeyPurpose) -> AccessKey {
        kdf::derive_access_key(b"test-passphrase", b"0123456789abcdef", purpose).unwrap()
    }

    #[test]
    fn test_chunk_round_trip() {
        let enc = test_key(KeyPurpose::Encrypt);
        let dec = test_key(KeyPurpose::Decrypt);
        let plaintext = b"The cat sat on the mat.";

        let record = encode_chunk(plaintext, &enc, 3, 7).unwrap();
        let decoded = decode_chunk(&record, &dec, 3, 7).unwrap();
        assert_eq!(&decoded[..], plaintext);
    }

    #[test]
    fn test_empty_chunk_round_trip() {
        let enc = test_key(KeyPurpose::Encrypt);
        let dec = test_key(KeyPurpose::Decrypt);

        let record = encode_chunk(b"", &enc, 0, 1).unwrap();
        let decoded = decode_chunk(&record, &dec, 0, 1).unwrap();
        assert_eq!(&decoded[..], b"");
    }

    #[test]
    fn test_fresh_nonce_per_encode() {
        let enc = test_key(KeyPurpose::Encrypt);
        let a = encode_chunk(b"same plaintext", &enc, 0, 1).unwrap();
        let b = encode_chunk(b"same plaintext", &enc, 0, 1).unwrap();
        assert_ne!(a.offset, b.offset);
        assert_ne!(a.payload, b.payload);
    }

    #[test]
    fn test_wrong_index_fails_closed() {
        let enc = test_key(KeyPurpose::Encrypt);
        let dec = test_key(KeyPurpose::Decrypt);

        let record = encode_chunk(b"positional", &enc, 2, 5).unwrap();
        let err = decode_chunk(&record, &dec, 3, 5).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_wrong_total_fails_closed() {
        let enc = test_key(KeyPurpose::Encrypt);
        let dec = test_key(KeyPurpose::Decrypt);

        let record = encode_chunk(b"positional", &enc, 2, 5).unwrap();
        let err = decode_chunk(&record, &dec, 2, 6).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_ciphertext_detected() {
        let enc = test_key(KeyPurpose::Encrypt);
        let dec = test_key(KeyPurpose::Decrypt);

        let record = encode_chunk(b"integrity matters", &enc, 0, 1).unwrap();
        let mut raw = decode_b64(&record.payload, "ct").unwrap();
        raw[0] ^= 0x01;
        let tampered = ChunkRecord {
            offset: record.offset.clone(),
            payload: encode_b64(&raw),
        };

        let err = decode_chunk(&tampered, &dec, 0, 1).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_nonce_detected() {
        let enc = test_key(KeyPurpose::Encrypt);
        let dec = test_key(KeyPurpose::Decrypt);

        let record = encode_chunk(b"integrity matters", &enc, 0, 1).unwrap();
        let mut raw = decode_b64(&record.offset, "nonce").unwrap();
        raw[11] ^= 0x80;
        let tampered = ChunkRecord {
            offset: encode_b64(&raw),
            payload: record.payload.clone(),
        };

        let err = decode_chunk(&tampered, &dec, 0, 1).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        let dec = test_key(KeyPurpose::Decrypt);
        let record = ChunkRecord {
            offset: encode_b64(b"short"),
            payload: encode_b64(b"whatever-ciphertext"),
        };
        let err = decode_chunk(&record, &dec, 0, 1).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::BinaryFormat));
    }

    #[test]
    fn test_key_purpose_misuse_rejected() {
        let enc = test_key(KeyPurpose::Encrypt);
        let record = encode_chunk(b"data", &enc, 0, 1).unwrap();
        let err = decode_chunk(&record, &enc, 0, 1).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::InternalInvariant));
    }

    #[test]
    fn test_encode_chunks_builds_valid_payload() {
        let payload = encode_chunks(&["alpha", "beta", "gamma"], b"pw").unwrap();
        payload.validate(FORMAT_VERSION).unwrap();

        let Payload::Chunked(p) = &payload else {
            panic!("expected chunked payload");
        };
        assert_eq!(p.chunks.len(), 3);

        let seed = decode_b64(&p.seed, "seed").unwrap();
        assert_eq!(seed.len(), SEED_LEN);

        let key = kdf::derive_access_key(b"pw", &seed, KeyPurpose::Decrypt).unwrap();
        let decoded = decode_chunk(&p.chunks[1], &key, 1, 3).unwrap();
        assert_eq!(&decoded[..], b"beta");
    }

    #[test]
    fn test_encode_chunks_rejects_empty_input() {
        let plaintexts: [&str; 0] = [];
        let err = encode_chunks(&plaintexts, b"pw").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PayloadInvalid));
    }

    #[test]
    fn test_seed_fresh_per_payload() {
        let a = encode_chunks(&["same"], b"pw").unwrap();
        let b = encode_chunks(&["same"], b"pw").unwrap();
        let (Payload::Chunked(a), Payload::Chunked(b)) = (&a, &b) else {
            panic!("expected chunked payloads");
        };
        assert_ne!(a.seed, b.seed);
    }

    #[test]
    fn test_legacy_round_trip() {
        let payload = encode_legacy(b"one single markdown document", b"pw").unwrap();
        payload.validate(LEGACY_VERSION).unwrap();
        let Payload::Legacy(p) = &payload else {
            panic!("expected legacy payload");
        };
        let decoded = decode_legacy(p, b"pw").unwrap();
        assert_eq!(&decoded[..], b"one single markdown document");
    }

    #[test]
    fn test_legacy_wrong_passphrase() {
        let payload = encode_legacy(b"secret", b"correct").unwrap();
        let Payload::Legacy(p) = &payload else {
            panic!("expected legacy payload");
        };
        let err = decode_legacy(p, b"wrong").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }
}
