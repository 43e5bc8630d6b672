//! In-memory plaintext hygiene
//!
//! A decoded chunk never sits in memory as a single recoverable byte array
//! for longer than one immediate use. On construction the plaintext is
//! XOR-masked with a fresh random one-time mask and the source buffer is
//! zeroed in place; `reveal` reconstructs the plaintext on demand for the
//! minimum time needed. Scrubbing zeroes both internal buffers and runs on
//! every exit path, including drop.
//!
//! This is best-effort mitigation against memory inspection and crash-dump
//! exposure, not a cryptographic security boundary.

use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, Zeroizing};

/// The scrambled in-memory representation of one decrypted chunk: a
/// cipher-masked byte buffer plus its one-time mask.
pub struct ScrambledChunk {
    scrambled: Vec<u8>,
    mask: Vec<u8>,
}

impl ScrambledChunk {
    /// Masks `plaintext` with a fresh random one-time pad and zeroes the
    /// source buffer in place.
    pub fn scramble(plaintext: &mut [u8]) -> ScrambledChunk {
        let mut mask = vec![0u8; plaintext.len()];
        OsRng.fill_bytes(&mut mask);

        let mut scrambled = vec![0u8; plaintext.len()];
        for (i, byte) in plaintext.iter().enumerate() {
            scrambled[i] = byte ^ mask[i];
        }
        plaintext.zeroize();

        ScrambledChunk { scrambled, mask }
    }

    /// Reconstructs the plaintext bytes. The returned buffer zeroes itself
    /// when dropped; keep it alive only as long as strictly needed.
    pub fn reveal(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(vec![0u8; self.scrambled.len()]);
        for i in 0..self.scrambled.len() {
            bytes[i] = self.scrambled[i] ^ self.mask[i];
        }
        bytes
    }

    /// Reconstructs the plaintext as UTF-8 text, replacing invalid sequences.
    pub fn reveal_text(&self) -> Zeroizing<String> {
        let bytes = self.reveal();
        Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Zeroes and detaches both internal buffers. Safe to call repeatedly.
    pub fn scrub(&mut self) {
        self.scrambled.zeroize();
        self.mask.zeroize();
        self.scrambled = Vec::new();
        self.mask = Vec::new();
    }

    /// True once the chunk's buffers have been scrubbed (or it held no data).
    pub fn is_scrubbed(&self) -> bool {
        self.scrambled.is_empty() && self.mask.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scrambled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scrambled.is_empty()
    }
}

impl Drop for ScrambledChunk {
    fn drop(&mut self) {
        self.scrub();
    }
}

impl std::fmt::Debug for ScrambledChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrambledChunk")
            .field("len", &self.scrambled.len())
            .finish()
    }
}
