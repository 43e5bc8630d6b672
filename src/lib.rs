//! Shardbox - passphrase-based chunked markdown encryption
//!
//! A payload document seals markdown as an ordered sequence of independently
//! encrypted chunks (PBKDF2-HMAC-SHA256 key derivation, AES-256-GCM with
//! positional associated data). Chunks decode on demand and in any order,
//! decoded plaintext is XOR-scrambled while resident in memory, and a
//! cancellable search engine scans the decrypted material incrementally.

#![forbid(unsafe_code)]

pub mod chunkcrypt;
pub mod chunker;
pub mod decoder;
pub mod error;
pub mod file_ops;
pub mod kdf;
pub mod passphrase;
pub mod payload;
pub mod remote;
pub mod scramble;
pub mod search;
pub mod session;
