//! Persisted payload format and structural validation
//!
//! A payload is a JSON document in one of two wire shapes, discriminated by
//! the `version` field:
//!
//! - version 2 (current, chunked):
//!   `{ "version": 2, "seed": <base64>, "chunks": [ { "offset": <base64 nonce>, "payload": <base64 ciphertext> }, ... ] }`
//! - version 1 (legacy, single blob):
//!   `{ "version": 1, "seed": <base64>, "offset": <base64 nonce>, "payload": <base64 ciphertext> }`
//!
//! Field names are wire-compatible with prior releases and must not change.
//! The historical name for the nonce field is `offset`.
//!
//! Validation here is purely structural. It must run before key derivation so
//! that a malformed document never costs a PBKDF2 pass.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorKind, Result, ShardboxError};

/// Format version produced by the chunked codec.
pub const FORMAT_VERSION: u32 = 2;

/// Format version of the legacy single-blob codec.
pub const LEGACY_VERSION: u32 = 1;

/// File extension for persisted payload documents.
pub const DATA_EXTENSION: &str = ".md.data";

/// One unit of ciphertext within a chunked payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Base64 of the 12-byte random nonce. Named `offset` on the wire.
    pub offset: String,
    /// Base64 of the AEAD output (ciphertext plus integrity tag).
    pub payload: String,
}

/// Legacy (version 1) payload: the whole document sealed in one AEAD call,
/// with no associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyPayload {
    pub version: u32,
    pub seed: String,
    pub offset: String,
    pub payload: String,
}

/// Current (version 2) payload: an ordered, non-empty sequence of
/// independently sealed chunks under one payload-scoped seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkedPayload {
    pub version: u32,
    pub seed: String,
    pub chunks: Vec<ChunkRecord>,
}

/// A parsed payload. Legacy and chunked documents share a `version`
/// discriminant but have materially different field sets, so they are kept
/// as distinct variants rather than one struct with optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Legacy(LegacyPayload),
    Chunked(ChunkedPayload),
}

/// Loose mirror of both wire shapes, used only during parsing.
#[derive(Deserialize)]
struct RawPayload {
    version: i64,
    #[serde(default)]
    seed: Option<String>,
    #[serde(default)]
    offset: Option<String>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    chunks: Option<Vec<RawChunk>>,
}

#[derive(Deserialize)]
struct RawChunk {
    #[serde(default)]
    offset: Option<String>,
    #[serde(default)]
    payload: Option<String>,
}

fn invalid(msg: &str) -> ShardboxError {
    ShardboxError::with_kind(ErrorCategory::User, ErrorKind::PayloadInvalid, msg)
}

impl Payload {
    /// Parse a payload document from its JSON text.
    ///
    /// Parsing only shapes the data; call [`Payload::validate`] before
    /// handing the result to any cryptographic operation.
    pub fn from_json(text: &str) -> Result<Payload> {
        let raw: RawPayload = serde_json::from_str(text).map_err(|e| {
            ShardboxError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::PayloadInvalid,
                "input is not a valid payload document",
                e,
            )
        })?;

        if raw.version < 0 || raw.version > u32::MAX as i64 {
            return Err(ShardboxError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnsupportedVersion,
                format!("unsupported format version: {}", raw.version),
            ));
        }
        let version = raw.version as u32;

        if version == LEGACY_VERSION {
            Ok(Payload::Legacy(LegacyPayload {
                version,
                seed: raw.seed.unwrap_or_default(),
                offset: raw.offset.unwrap_or_default(),
                payload: raw.payload.unwrap_or_default(),
            }))
        } else {
            Ok(Payload::Chunked(ChunkedPayload {
                version,
                seed: raw.seed.unwrap_or_default(),
                chunks: raw
                    .chunks
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| ChunkRecord {
                        offset: c.offset.unwrap_or_default(),
                        payload: c.payload.unwrap_or_default(),
                    })
                    .collect(),
            }))
        }
    }

    /// Serialize the payload to its persisted JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            ShardboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "failed to serialize payload",
                e,
            )
        })
    }

    /// The version the document claims on the wire.
    pub fn version(&self) -> u32 {
        match self {
            Payload::Legacy(p) => p.version,
            Payload::Chunked(p) => p.version,
        }
    }

    /// Structural validation, failing fast on the first violation.
    ///
    /// Checks, in order: version matches `expected_version` for the variant,
    /// seed non-empty, chunk list non-empty, and every chunk record carries a
    /// non-empty nonce and ciphertext. No cryptographic work happens here.
    pub fn validate(&self, expected_version: u32) -> Result<()> {
        match self {
            Payload::Legacy(p) => {
                if p.version != expected_version {
                    return Err(unsupported_version(p.version));
                }
                if p.seed.trim().is_empty() {
                    return Err(invalid("payload has an invalid seed"));
                }
                if p.offset.trim().is_empty() || p.payload.trim().is_empty() {
                    return Err(invalid("payload has invalid sealed data"));
                }
                Ok(())
            }
            Payload::Chunked(p) => {
                if p.version != expected_version {
                    return Err(unsupported_version(p.version));
                }
                if p.seed.trim().is_empty() {
                    return Err(invalid("payload has an invalid seed"));
                }
                if p.chunks.is_empty() {
                    return Err(invalid("payload is missing chunk data"));
                }
                for chunk in &p.chunks {
                    if chunk.offset.trim().is_empty() || chunk.payload.trim().is_empty() {
                        return Err(ShardboxError::with_kind(
                            ErrorCategory::User,
                            ErrorKind::ChunkDataInvalid,
                            "payload has an invalid chunk record",
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

fn unsupported_version(actual: u32) -> ShardboxError {
    ShardboxError::with_kind(
        ErrorCategory::User,
        ErrorKind::UnsupportedVersion,
        format!("unsupported format version: {actual}"),
    )
}

/// Encode bytes into the payload's base64 alphabet (standard, padded).
pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 payload field, naming the field in the failure message.
pub fn decode_b64(value: &str, field: &str) -> Result<Vec<u8>> {
    BASE64.decode(value).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Base64Decode,
            format!("base64 decoding of {field} failed"),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked_json() -> String {
        r#"{"version":2,"seed":"c2VlZHNlZWRzZWVkc2VlZA==","chunks":[{"offset":"bm9uY2Vub25jZW5v","payload":"Y2lwaGVydGV4dA=="}]}"#
            .to_string()
    }

    #[test]
    fn test_parse_chunked() {
        let payload = Payload::from_json(&chunked_json()).unwrap();
        payload.validate(FORMAT_VERSION).unwrap();
        match payload {
            Payload::Chunked(p) => {
                assert_eq!(p.version, 2);
                assert_eq!(p.chunks.len(), 1);
            }
            Payload::Legacy(_) => panic!("expected chunked variant"),
        }
    }

    #[test]
    fn test_parse_legacy() {
        let json = r#"{"version":1,"seed":"c2VlZA==","offset":"bm9uY2U=","payload":"Y3Q="}"#;
        let payload = Payload::from_json(json).unwrap();
        payload.validate(LEGACY_VERSION).unwrap();
        assert!(matches!(payload, Payload::Legacy(_)));
    }

    #[test]
    fn test_reject_future_version() {
        let json = r#"{"version":99,"seed":"c2VlZA==","chunks":[{"offset":"bg==","payload":"cA=="}]}"#;
        let payload = Payload::from_json(json).unwrap();
        let err = payload.validate(FORMAT_VERSION).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedVersion));
    }

    #[test]
    fn test_reject_empty_chunks() {
        let json = r#"{"version":2,"seed":"c2VlZA==","chunks":[]}"#;
        let payload = Payload::from_json(json).unwrap();
        let err = payload.validate(FORMAT_VERSION).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PayloadInvalid));
    }

    #[test]
    fn test_reject_missing_chunks_field() {
        let json = r#"{"version":2,"seed":"c2VlZA=="}"#;
        let payload = Payload::from_json(json).unwrap();
        assert!(payload.validate(FORMAT_VERSION).is_err());
    }

    #[test]
    fn test_reject_empty_seed() {
        let json = r#"{"version":2,"seed":"","chunks":[{"offset":"bg==","payload":"cA=="}]}"#;
        let payload = Payload::from_json(json).unwrap();
        let err = payload.validate(FORMAT_VERSION).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PayloadInvalid));
    }

    #[test]
    fn test_reject_blank_chunk_fields() {
        let json = r#"{"version":2,"seed":"c2VlZA==","chunks":[{"offset":"","payload":"cA=="}]}"#;
        let payload = Payload::from_json(json).unwrap();
        let err = payload.validate(FORMAT_VERSION).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::ChunkDataInvalid));
    }

    #[test]
    fn test_reject_non_object() {
        let err = Payload::from_json("[1,2,3]").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::PayloadInvalid));
    }

    #[test]
    fn test_reject_garbage() {
        assert!(Payload::from_json("not json at all").is_err());
    }

    #[test]
    fn test_json_round_trip_preserves_field_names() {
        let payload = Payload::from_json(&chunked_json()).unwrap();
        let json = payload.to_json().unwrap();
        assert!(json.contains("\"version\":2"));
        assert!(json.contains("\"seed\""));
        assert!(json.contains("\"offset\""));
        assert!(json.contains("\"payload\""));
        assert_eq!(Payload::from_json(&json).unwrap(), payload);
    }

    #[test]
    fn test_b64_helpers() {
        let bytes = b"\x00\x01\xfftest";
        let encoded = encode_b64(bytes);
        assert_eq!(decode_b64(&encoded, "test field").unwrap(), bytes);
        let err = decode_b64("%%%", "seed").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Base64Decode));
    }
}
