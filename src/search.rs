//! Incremental, cancellable substring search over decoded chunks
//!
//! The engine drives a [`ChunkDecoder`] sequentially over all chunks,
//! lower-casing both chunk text and query and scanning for non-overlapping
//! occurrences. Per matching chunk it records the total match count, up to
//! the first five match offsets, and a bounded preview window around the
//! first match. Progress is reported after every chunk regardless of match
//! outcome.
//!
//! Cancellation is cooperative. A [`SearchCoordinator`] mints monotonically
//! increasing run identifiers; starting a new run invalidates every token
//! from earlier runs, so a superseded search stops issuing chunk work and its
//! callers can recognize stale results by asking their token whether it is
//! still current.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::decoder::ChunkDecoder;
use crate::error::Result;

/// Upper bound on per-chunk match offsets recorded in a result.
pub const MAX_RECORDED_OFFSETS: usize = 5;

/// Characters of context kept on each side of the first match in a preview.
const PREVIEW_RADIUS: usize = 48;

/// Search outcome for one matching chunk. Chunks without matches contribute
/// no result (results are sparse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMatch {
    pub chunk_index: usize,
    /// Total number of non-overlapping occurrences in the chunk.
    pub match_count: usize,
    /// Byte offsets of the first [`MAX_RECORDED_OFFSETS`] occurrences,
    /// relative to the lower-cased chunk text.
    pub offsets: Vec<usize>,
    /// Bounded context window around the first occurrence, whitespace
    /// collapsed, with ellipsis markers where truncated.
    pub preview: String,
}

/// Mints run identifiers so that a fresh search invalidates any previous
/// invocation's ability to affect shared state.
#[derive(Debug, Default)]
pub struct SearchCoordinator {
    current: Arc<AtomicU64>,
}

impl SearchCoordinator {
    pub fn new() -> SearchCoordinator {
        SearchCoordinator::default()
    }

    /// Starts a new run, returning its token. All tokens from earlier runs
    /// observe themselves as cancelled from this point on.
    pub fn begin(&self) -> CancelToken {
        let run = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(run, "search run started");
        CancelToken {
            run,
            current: Arc::clone(&self.current),
        }
    }

    /// Invalidates all outstanding runs without starting a new one.
    pub fn cancel_all(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cooperative cancellation handle for one search run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    run: u64,
    current: Arc<AtomicU64>,
}

impl CancelToken {
    /// A token that never reports cancellation, for standalone scans.
    pub fn unlimited() -> CancelToken {
        CancelToken {
            run: 0,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    /// True once a newer run has superseded this one.
    pub fn is_cancelled(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.run
    }

    /// True while this run is still the latest.
    pub fn is_current(&self) -> bool {
        !self.is_cancelled()
    }
}

/// Scan every chunk for case-insensitive occurrences of `query`.
///
/// Chunks are processed in ascending index order; `on_progress` receives
/// `(chunks_scanned, total)` after each one. When `cancel` reports
/// cancellation the engine stops issuing further chunk work and returns the
/// results accumulated so far; callers that treat a superseded run as "no
/// results" should check `cancel.is_current()` before using them.
pub fn search<P>(
    decoder: &ChunkDecoder,
    query: &str,
    mut on_progress: P,
    cancel: &CancelToken,
) -> Result<Vec<ChunkMatch>>
where
    P: FnMut(usize, usize),
{
    let lowered_query = query.to_lowercase();
    if lowered_query.is_empty() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    decoder.decode_all(
        |chunk, index, _total| {
            let text = chunk.reveal_text();
            if let Some(found) = scan_chunk(&text, &lowered_query, index) {
                results.push(found);
            }
            Ok(())
        },
        &mut on_progress,
        || cancel.is_cancelled(),
    )?;

    debug!(matches = results.len(), "search scan finished");
    Ok(results)
}

fn scan_chunk(text: &str, lowered_query: &str, chunk_index: usize) -> Option<ChunkMatch> {
    // Lower-case the chunk while recording, per lower-cased byte, the byte
    // offset of the originating character. Case folds can change byte
    // lengths (e.g. U+0130), so match positions in the lower-cased text
    // cannot be reused against the original without this map.
    let mut lower = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    for (byte_index, ch) in text.char_indices() {
        for folded in ch.to_lowercase() {
            let before = lower.len();
            lower.push(folded);
            for _ in before..lower.len() {
                origin.push(byte_index);
            }
        }
    }

    let mut offsets = Vec::new();
    let mut match_count = 0usize;
    let mut first_match = None;
    let mut position = 0usize;

    while let Some(found) = lower[position..].find(lowered_query) {
        let absolute = position + found;
        if first_match.is_none() {
            first_match = Some(absolute);
        }
        if offsets.len() < MAX_RECORDED_OFFSETS {
            offsets.push(absolute);
        }
        match_count += 1;
        position = absolute + lowered_query.len();
    }

    let first_match = first_match?;

    Some(ChunkMatch {
        chunk_index,
        match_count,
        offsets,
        preview: build_preview(text, origin[first_match], lowered_query.len()),
    })
}

/// Builds a bounded context window around a match: up to [`PREVIEW_RADIUS`]
/// characters on each side, internal whitespace collapsed to single spaces,
/// ellipsis markers where the window truncates the chunk.
fn build_preview(text: &str, match_start: usize, match_len: usize) -> String {
    let start = floor_char_boundary(text, match_start.saturating_sub(PREVIEW_RADIUS));
    let end = ceil_char_boundary(
        text,
        (match_start + match_len + PREVIEW_RADIUS).min(text.len()),
    );

    let snippet = text[start..end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let prefix = if start > 0 { "…" } else { "" };
    let suffix = if end < text.len() { "…" } else { "" };
    format!("{prefix}{snippet}{suffix}")
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
