//! Session-scoped chunk decoding
//!
//! [`ChunkDecoder`] pays the key derivation cost exactly once per session and
//! then decodes chunks in any order: sequential for rendering, random access
//! for "jump to chunk", or a full pass for search. Each invocation is
//! independently fallible; a failure on one chunk does not invalidate the
//! decoder for other chunks.
//!
//! At most one decode is active per decoder at any instant. A second request
//! arriving while one is in flight is rejected with [`ErrorKind::DecodeBusy`]
//! rather than queued, which keeps plaintext residency bounded and
//! predictable.

use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::debug;
use zeroize::Zeroizing;

use crate::chunkcrypt;
use crate::error::{ErrorCategory, ErrorKind, Result, ShardboxError};
use crate::kdf::{self, AccessKey, KeyPurpose};
use crate::payload::{ChunkRecord, FORMAT_VERSION, Payload, decode_b64};
use crate::scramble::ScrambledChunk;

/// A reusable, index-addressable decoder for one validated chunked payload.
///
/// Holds the decrypt-only key for the session; the key is never mutated after
/// derivation and is zeroized when the decoder is dropped.
pub struct ChunkDecoder {
    key: AccessKey,
    chunks: Vec<ChunkRecord>,
    in_flight: Mutex<()>,
}

impl ChunkDecoder {
    /// Validates the payload, derives the decrypt-only key once, and captures
    /// the chunk records for the session.
    ///
    /// Structural validation runs before derivation, so a malformed or
    /// wrong-version payload never costs a PBKDF2 pass.
    pub fn new(payload: &Payload, passphrase: &[u8]) -> Result<ChunkDecoder> {
        payload.validate(FORMAT_VERSION)?;
        let Payload::Chunked(p) = payload else {
            // validate() only accepts the chunked variant at FORMAT_VERSION.
            return Err(ShardboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "validated payload was not chunked",
            ));
        };

        let seed = decode_b64(&p.seed, "seed")?;
        let key = kdf::derive_access_key(passphrase, &seed, KeyPurpose::Decrypt)?;
        debug!(chunks = p.chunks.len(), "chunk decoder ready");

        Ok(ChunkDecoder {
            key,
            chunks: p.chunks.clone(),
            in_flight: Mutex::new(()),
        })
    }

    /// Number of chunks in the session's payload.
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Decode a caller-supplied record, asserting it belongs at `index`.
    ///
    /// The positional claim is authenticated: a record presented at any
    /// position other than the one it was sealed for fails closed.
    pub fn decode(&self, record: &ChunkRecord, index: usize) -> Result<Zeroizing<Vec<u8>>> {
        let _guard = self.acquire()?;
        chunkcrypt::decode_chunk(record, &self.key, index, self.chunks.len())
    }

    /// Decode the chunk stored at `index` (random access).
    pub fn decode_at(&self, index: usize) -> Result<Zeroizing<Vec<u8>>> {
        let record = self.chunks.get(index).ok_or_else(|| {
            ShardboxError::new(
                ErrorCategory::User,
                format!(
                    "chunk index {index} out of range (payload has {} chunks)",
                    self.chunks.len()
                ),
            )
        })?;
        let _guard = self.acquire()?;
        chunkcrypt::decode_chunk(record, &self.key, index, self.chunks.len())
    }

    /// Decode every chunk in ascending index order, handing each one to
    /// `on_chunk` in scrambled form.
    ///
    /// The scrambled chunk is scrubbed as soon as `on_chunk` returns,
    /// including on error paths. `on_progress` is invoked with
    /// `(chunks_done, total)` after every chunk. `should_abort` is checked
    /// before each chunk; once it reports true, no further chunk work is
    /// issued and the pass returns successfully.
    pub fn decode_all<C, P, A>(
        &self,
        mut on_chunk: C,
        mut on_progress: P,
        should_abort: A,
    ) -> Result<()>
    where
        C: FnMut(&ScrambledChunk, usize, usize) -> Result<()>,
        P: FnMut(usize, usize),
        A: Fn() -> bool,
    {
        let _guard = self.acquire()?;
        let total = self.chunks.len();

        for index in 0..total {
            if should_abort() {
                debug!(index, total, "decode pass aborted");
                return Ok(());
            }
            let mut plaintext =
                chunkcrypt::decode_chunk(&self.chunks[index], &self.key, index, total)?;
            let scrambled = ScrambledChunk::scramble(&mut plaintext);
            // Scrubbing runs when `scrambled` drops, on success and error alike.
            on_chunk(&scrambled, index, total)?;
            on_progress(index + 1, total);
        }

        Ok(())
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        match self.in_flight.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(ShardboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::DecodeBusy,
                "another decode for this session is already in flight",
            )),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }
}

impl std::fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkcrypt::encode_chunks;
    use crate::kdf::test_support::derive_call_count;
    use crate::payload::encode_b64;

    const PASSPHRASE: &[u8] = b"decoder-test-passphrase";

    fn chunked(parts: &[&str]) -> Payload {
        encode_chunks(parts, PASSPHRASE).unwrap()
    }

    #[test]
    fn test_random_access_decode() {
        let payload = chunked(&["zero", "one", "two"]);
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();

        assert_eq!(decoder.total_chunks(), 3);
        assert_eq!(&decoder.decode_at(2).unwrap()[..], b"two");
        assert_eq!(&decoder.decode_at(0).unwrap()[..], b"zero");
        assert_eq!(&decoder.decode_at(1).unwrap()[..], b"one");
    }

    #[test]
    fn test_decode_at_out_of_range() {
        let payload = chunked(&["only"]);
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();
        assert!(decoder.decode_at(1).is_err());
    }

    #[test]
    fn test_record_presented_at_wrong_position() {
        let payload = chunked(&["zero", "one"]);
        let Payload::Chunked(p) = &payload else {
            panic!("expected chunked payload");
        };
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();

        let err = decoder.decode(&p.chunks[0], 1).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_wrong_passphrase() {
        let payload = chunked(&["secret"]);
        let decoder = ChunkDecoder::new(&payload, b"not-the-passphrase").unwrap();
        let err = decoder.decode_at(0).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_one_bad_chunk_does_not_invalidate_decoder() {
        let payload = chunked(&["zero", "one", "two"]);
        let Payload::Chunked(p) = &payload else {
            panic!("expected chunked payload");
        };
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();

        let mut raw = crate::payload::decode_b64(&p.chunks[1].payload, "ct").unwrap();
        raw[0] ^= 0xff;
        let tampered = ChunkRecord {
            offset: p.chunks[1].offset.clone(),
            payload: encode_b64(&raw),
        };

        assert!(decoder.decode_at(0).is_ok());
        assert!(decoder.decode(&tampered, 1).is_err());
        assert!(decoder.decode_at(2).is_ok());
    }

    #[test]
    fn test_decode_all_in_order_with_progress() {
        let payload = chunked(&["alpha", "beta", "gamma"]);
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();

        let mut seen = Vec::new();
        let mut progress = Vec::new();
        decoder
            .decode_all(
                |chunk, index, total| {
                    assert!(!chunk.is_scrubbed());
                    assert_eq!(total, 3);
                    seen.push((index, chunk.reveal_text().to_string()));
                    Ok(())
                },
                |done, total| progress.push((done, total)),
                || false,
            )
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (0, "alpha".to_string()),
                (1, "beta".to_string()),
                (2, "gamma".to_string()),
            ]
        );
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_decode_all_abort_stops_issuing_work() {
        use std::cell::Cell;

        let payload = chunked(&["alpha", "beta", "gamma"]);
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();

        // Shared between both callbacks, so it must be a Cell.
        let seen = Cell::new(0usize);
        decoder
            .decode_all(
                |_, _, _| {
                    seen.set(seen.get() + 1);
                    Ok(())
                },
                |_, _| {},
                // Aborts before the second chunk is decoded.
                || seen.get() >= 1,
            )
            .unwrap();

        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_second_decode_rejected_while_in_flight() {
        let payload = chunked(&["alpha", "beta"]);
        let decoder = ChunkDecoder::new(&payload, PASSPHRASE).unwrap();

        decoder
            .decode_all(
                |_, index, _| {
                    if index == 0 {
                        let err = decoder.decode_at(1).unwrap_err();
                        assert_eq!(err.kind, Some(ErrorKind::DecodeBusy));
                    }
                    Ok(())
                },
                |_, _| {},
                || false,
            )
            .unwrap();

        // Lock released after the pass; sequential use works again.
        assert!(decoder.decode_at(0).is_ok());
    }

    #[test]
    fn test_version_mismatch_rejected_before_derivation() {
        let payload = chunked(&["data"]);
        let Payload::Chunked(p) = &payload else {
            panic!("expected chunked payload");
        };
        let mut future = p.clone();
        future.version = 99;

        let before = derive_call_count();
        let err = ChunkDecoder::new(&Payload::Chunked(future), PASSPHRASE).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedVersion));
        assert_eq!(derive_call_count(), before, "derivation must not run");
    }

    #[test]
    fn test_empty_chunks_rejected_before_derivation() {
        let payload = chunked(&["data"]);
        let Payload::Chunked(p) = &payload else {
            panic!("expected chunked payload");
        };
        let mut empty = p.clone();
        empty.chunks.clear();

        let before = derive_call_count();
        let err = ChunkDecoder::new(&Payload::Chunked(empty), PASSPHRASE).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PayloadInvalid));
        assert_eq!(derive_call_count(), before, "derivation must not run");
    }

    #[test]
    fn test_legacy_payload_rejected() {
        let payload = crate::chunkcrypt::encode_legacy(b"blob", PASSPHRASE).unwrap();
        let err = ChunkDecoder::new(&payload, PASSPHRASE).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedVersion));
    }
}
