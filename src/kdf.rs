//! Passphrase key derivation using PBKDF2-HMAC-SHA256
//!
//! One payload-scoped seed plus the user's passphrase yields one 256-bit
//! AES key. The iteration count is deliberately high; it is the primary
//! defense against offline passphrase guessing and must stay consistent
//! between encode and decode for a given format version.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{ErrorCategory, ErrorKind, Result, ShardboxError};

/// PBKDF2 iteration count for format versions 1 and 2.
pub const DERIVATION_ROUNDS: u32 = 100_000;

/// Length of derived key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Length of the random per-payload seed in bytes.
pub const SEED_LEN: usize = 16;

/// The single capability a derived key instance is allowed to exercise.
///
/// A key derived for decryption can never be handed to the encrypt path and
/// vice versa; the codec checks this before touching the cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    Encrypt,
    Decrypt,
}

/// A 256-bit key derived from a passphrase, restricted to one purpose.
///
/// Zeroized on drop so key material does not linger in memory.
pub struct AccessKey {
    bytes: [u8; KEY_LEN],
    purpose: KeyPurpose,
}

impl AccessKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub fn purpose(&self) -> KeyPurpose {
        self.purpose
    }

    /// Asserts the key was derived for `purpose`.
    pub(crate) fn require(&self, purpose: KeyPurpose) -> Result<()> {
        if self.purpose != purpose {
            return Err(ShardboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!(
                    "key derived for {:?} used for {:?}",
                    self.purpose, purpose
                ),
            ));
        }
        Ok(())
    }
}

impl Drop for AccessKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("bytes", &"[REDACTED]")
            .field("purpose", &self.purpose)
            .finish()
    }
}

/// Derive a purpose-restricted 256-bit key from a passphrase and a
/// payload-scoped seed.
///
/// Deterministic: the same `(passphrase, seed)` always yields the same key
/// material. The seed is the PBKDF2 salt and must be random per payload.
pub fn derive_access_key(passphrase: &[u8], seed: &[u8], purpose: KeyPurpose) -> Result<AccessKey> {
    #[cfg(test)]
    test_support::record_derive_call();

    if seed.is_empty() {
        return Err(ShardboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::DerivationFailure,
            "key derivation requires a non-empty seed",
        ));
    }

    let mut bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase, seed, DERIVATION_ROUNDS, &mut bytes);

    Ok(AccessKey { bytes, purpose })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::Cell;

    thread_local! {
        // Thread-local so parallel tests cannot perturb each other's counts.
        static DERIVE_CALLS: Cell<u64> = const { Cell::new(0) };
    }

    /// Counts derivations so tests can assert that structurally invalid
    /// payloads never reach the KDF.
    pub fn record_derive_call() {
        DERIVE_CALLS.with(|c| c.set(c.get() + 1));
    }

    pub fn derive_call_count() -> u64 {
        DERIVE_CALLS.with(|c| c.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_deterministic() {
        let key1 = derive_access_key(b"passphrase", b"0123456789abcdef", KeyPurpose::Decrypt)
            .unwrap();
        let key2 = derive_access_key(b"passphrase", b"0123456789abcdef", KeyPurpose::Decrypt)
            .unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_passphrases_different_keys() {
        let key1 = derive_access_key(b"one", b"0123456789abcdef", KeyPurpose::Decrypt).unwrap();
        let key2 = derive_access_key(b"two", b"0123456789abcdef", KeyPurpose::Decrypt).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_seeds_different_keys() {
        let key1 = derive_access_key(b"same", b"0123456789abcdef", KeyPurpose::Encrypt).unwrap();
        let key2 = derive_access_key(b"same", b"fedcba9876543210", KeyPurpose::Encrypt).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_empty_seed_rejected() {
        let err = derive_access_key(b"pass", b"", KeyPurpose::Encrypt).unwrap_err();
        assert_eq!(err.kind, Some(crate::error::ErrorKind::DerivationFailure));
    }

    #[test]
    fn test_purpose_enforced() {
        let key = derive_access_key(b"pass", b"0123456789abcdef", KeyPurpose::Decrypt).unwrap();
        assert!(key.require(KeyPurpose::Decrypt).is_ok());
        assert!(key.require(KeyPurpose::Encrypt).is_err());
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = derive_access_key(b"pass", b"0123456789abcdef", KeyPurpose::Encrypt).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
    }
}
