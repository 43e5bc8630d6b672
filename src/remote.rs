//! Retrieval of encrypted payload documents
//!
//! The codec is agnostic to how payload bytes arrive; this module defines the
//! seam. A [`PayloadSource`] yields raw payload bytes for a named document
//! and may report rate limiting instead of data; [`fetch_with_retry`] honors
//! a bounded retry policy with backoff, surfacing the wait to the caller so
//! a UI can explain the delay.
//!
//! [`DirectorySource`] is the bundled filesystem implementation, used by the
//! CLI and by tests. Ciphertext is the only thing that ever crosses this
//! boundary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{ErrorCategory, ErrorKind, Result, ShardboxError};
use crate::payload::DATA_EXTENSION;

/// Outcome of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Raw payload bytes (still encrypted).
    Payload(Vec<u8>),
    /// The source is rate limited; retry no sooner than `retry_after`.
    RateLimited { retry_after: Duration },
}

/// A named store of encrypted payload documents.
pub trait PayloadSource {
    /// Attempt to fetch the raw bytes of one payload document.
    fn fetch(&mut self, name: &str) -> Result<FetchOutcome>;
}

/// Retry policy for [`fetch_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub retries: u32,
    /// Lower bound applied to any backoff wait.
    pub min_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 2,
            min_backoff: Duration::from_secs(1),
        }
    }
}

/// Fetch a payload document, sleeping through rate-limit backoff up to
/// `policy.retries` times. `on_rate_limit` is invoked with each wait before
/// sleeping so callers can surface it.
pub fn fetch_with_retry<S>(
    source: &mut S,
    name: &str,
    policy: RetryPolicy,
    mut on_rate_limit: impl FnMut(Duration),
) -> Result<Vec<u8>>
where
    S: PayloadSource + ?Sized,
{
    let mut remaining = policy.retries;
    loop {
        match source.fetch(name)? {
            FetchOutcome::Payload(bytes) => return Ok(bytes),
            FetchOutcome::RateLimited { retry_after } => {
                if remaining == 0 {
                    return Err(ShardboxError::with_kind(
                        ErrorCategory::Internal,
                        ErrorKind::RateLimited,
                        format!("rate limited fetching {name}; retries exhausted"),
                    ));
                }
                remaining -= 1;
                let wait = retry_after.max(policy.min_backoff);
                debug!(?wait, remaining, "rate limited, backing off");
                on_rate_limit(wait);
                std::thread::sleep(wait);
            }
        }
    }
}

/// Filesystem-backed payload source rooted at a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> DirectorySource {
        DirectorySource { root: root.into() }
    }

    /// Lists payload documents under the root, recursively, as root-relative
    /// paths. Only files carrying [`DATA_EXTENSION`] are returned.
    pub fn list_entries(&self) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        self.walk(&self.root, &mut entries)?;
        entries.sort();
        Ok(entries)
    }

    fn walk(&self, dir: &Path, entries: &mut Vec<String>) -> Result<()> {
        let listing = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
        for entry in listing {
            let entry = entry.map_err(|e| io_error(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, entries)?;
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(DATA_EXTENSION))
            {
                if let Ok(relative) = path.strip_prefix(&self.root) {
                    entries.push(relative.to_string_lossy().into_owned());
                }
            }
        }
        Ok(())
    }
}

impl PayloadSource for DirectorySource {
    fn fetch(&mut self, name: &str) -> Result<FetchOutcome> {
        let path = self.root.join(name);
        let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
        Ok(FetchOutcome::Payload(bytes))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ShardboxError {
    ShardboxError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::Io,
        format!("failed to read {}", path.display()),
        source,
    )
}
