//! High-level payload file operations
//!
//! Encode a markdown file into a chunked payload document, reveal one back to
//! plaintext, update an existing payload in place (validating the passphrase
//! first), and search inside one without materializing the whole document.
//!
//! Payload files are written with mode 0o600 on Unix. Updates are atomic:
//! tempfile, fsync, rename, so either the old payload or the new one exists,
//! never a partial file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use zeroize::Zeroizing;

use crate::chunker::{self, CHUNK_TARGET};
use crate::chunkcrypt;
use crate::decoder::ChunkDecoder;
use crate::error::{ErrorCategory, ErrorKind, Result, ShardboxError};
use crate::passphrase::PassphraseReader;
use crate::payload::Payload;
use crate::search::{self, CancelToken, ChunkMatch};

/// Encode a markdown file into a chunked payload document.
///
/// The markdown is split fence-aware into roughly [`CHUNK_TARGET`]-character
/// chunks, each sealed independently under a freshly seeded key.
pub fn encode_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let markdown = read_utf8(input_path)?;
    let chunks = chunker::split_markdown(&markdown, CHUNK_TARGET);
    let passphrase = passphrase_reader.read_passphrase()?;

    let payload = chunkcrypt::encode_chunks(&chunks, &passphrase)
        .map_err(|e| e.with_context("encoding failed"))?;
    let json = payload.to_json()?;

    write_file_secure(output_path, json.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))
}

/// Reveal a payload document back to markdown.
///
/// Both format versions are supported, selected by the payload's `version`
/// field: chunked payloads are decoded chunk by chunk in order, legacy
/// payloads in one call.
pub fn decode_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let payload = read_payload(input_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let markdown = reveal_payload(&payload, &passphrase)?;
    write_file_secure(output_path, markdown.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))
}

/// Replace a payload document's content with new markdown, re-using and
/// validating its passphrase.
///
/// The existing payload is decoded first; if the passphrase does not open
/// it, the update is refused. This prevents accidentally re-encoding under a
/// mistyped passphrase. The replacement is written atomically.
pub fn update_file(
    plain_path: &Path,
    crypt_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let existing = read_payload(crypt_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;

    // Validate the passphrase against the existing payload; plaintext is
    // discarded immediately.
    reveal_payload(&existing, &passphrase)
        .map_err(|e| e.with_context("refusing update: existing payload did not decode"))?;

    let markdown = read_utf8(plain_path)?;
    let chunks = chunker::split_markdown(&markdown, CHUNK_TARGET);
    let payload = chunkcrypt::encode_chunks(&chunks, &passphrase)
        .map_err(|e| e.with_context("encoding failed"))?;
    let json = payload.to_json()?;

    write_file_atomic(crypt_path, json.as_bytes())
}

/// Search inside a payload document without writing any plaintext to disk.
///
/// `on_progress` receives `(chunks_scanned, total)` after every chunk.
pub fn search_file(
    crypt_path: &Path,
    query: &str,
    passphrase_reader: &mut dyn PassphraseReader,
    on_progress: impl FnMut(usize, usize),
) -> Result<Vec<ChunkMatch>> {
    let payload = read_payload(crypt_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let decoder = ChunkDecoder::new(&payload, &passphrase)?;
    search::search(&decoder, query, on_progress, &CancelToken::unlimited())
}

fn reveal_payload(payload: &Payload, passphrase: &[u8]) -> Result<Zeroizing<String>> {
    match payload {
        Payload::Legacy(p) => {
            let bytes = chunkcrypt::decode_legacy(p, passphrase)
                .map_err(|e| e.with_context("failed to decode"))?;
            Ok(Zeroizing::new(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        }
        Payload::Chunked(_) => {
            let decoder = ChunkDecoder::new(payload, passphrase)?;
            let mut markdown = Zeroizing::new(String::new());
            decoder.decode_all(
                |chunk, _index, _total| {
                    markdown.push_str(&chunk.reveal_text());
                    Ok(())
                },
                |_, _| {},
                || false,
            )?;
            Ok(markdown)
        }
    }
}

fn read_payload(path: &Path) -> Result<Payload> {
    let text = read_utf8(path)?;
    Payload::from_json(&text)
        .map_err(|e| e.with_context(format!("{} is not a payload document", path.display())))
}

fn read_utf8(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
    String::from_utf8(bytes).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not valid UTF-8", path.display()),
            e,
        )
    })
}

/// Write file with secure permissions (0o600 on Unix).
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| {
                ShardboxError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Io,
                    format!("failed to open {}", path.display()),
                    e,
                )
            })?;

        file.write_all(contents).map_err(|e| {
            ShardboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| {
            ShardboxError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })
    }
}

/// Atomically replace `path` with `contents` via tempfile + fsync + rename.
fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        ShardboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            "target path has no parent directory",
        )
    })?;

    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to create tempfile",
            e,
        )
    })?;

    temp_file.write_all(contents).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to write to tempfile",
            e,
        )
    })?;
    // Flush and fsync so the rename, if it succeeds, always points at a
    // complete file.
    temp_file.flush().and_then(|()| temp_file.as_file().sync_all()).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to sync tempfile prior to rename",
            e,
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| {
                ShardboxError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to get tempfile metadata",
                    e,
                )
            })?
            .permissions();
        perms.set_mode(0o600);
        temp_file.as_file().set_permissions(perms).map_err(|e| {
            ShardboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to set tempfile permissions",
                e,
            )
        })?;
    }

    temp_file.persist(path).map_err(|e| {
        ShardboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn read_error(path: &Path, err: io::Error) -> ShardboxError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    ShardboxError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
