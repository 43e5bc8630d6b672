//! Caller-owned session context
//!
//! Holds everything one reveal session needs: the active payload, its
//! decoder, the render cursor, and the `idle -> loading -> ready` phase. The
//! library keeps no process-wide state; callers create a [`Session`], pass it
//! to the operations that need it, and drop it to discard the derived key.

use tracing::debug;

use crate::decoder::ChunkDecoder;
use crate::payload::Payload;

/// Lifecycle phase of a reveal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Loading,
    Ready,
}

/// Mutable state for one reveal session.
#[derive(Debug, Default)]
pub struct Session {
    phase: SessionPhase,
    payload: Option<Payload>,
    decoder: Option<ChunkDecoder>,
    cursor: usize,
    document: String,
    revealed: bool,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Marks the session as loading (a decode is being prepared).
    pub fn mark_loading(&mut self) {
        debug!(from = ?self.phase, "session loading");
        self.phase = SessionPhase::Loading;
    }

    /// Installs (or clears) the active payload, moving to `Ready` or `Idle`.
    pub fn set_active_payload(&mut self, payload: Option<Payload>) {
        self.phase = if payload.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        };
        self.payload = payload;
        debug!(phase = ?self.phase, "session payload updated");
    }

    pub fn active_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn set_decoder(&mut self, decoder: Option<ChunkDecoder>) {
        self.decoder = decoder;
    }

    pub fn decoder(&self) -> Option<&ChunkDecoder> {
        self.decoder.as_ref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, value: usize) {
        self.cursor = value;
    }

    /// Advances the render cursor, returning the new value.
    pub fn advance_cursor(&mut self) -> usize {
        self.cursor += 1;
        self.cursor
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn set_document(&mut self, name: impl Into<String>) {
        self.document = name.into();
    }

    pub fn has_revealed_content(&self) -> bool {
        self.revealed
    }

    pub fn set_revealed_content(&mut self, flag: bool) {
        self.revealed = flag;
        if !flag && self.phase != SessionPhase::Loading {
            self.phase = SessionPhase::Idle;
        }
    }

    /// Drops the payload, decoder, and cursor while keeping the document
    /// name. The derived key is discarded with the decoder; a new payload
    /// requires a fresh derivation.
    pub fn reset_chunk_state(&mut self) {
        self.payload = None;
        self.decoder = None;
        self.cursor = 0;
        if self.phase != SessionPhase::Loading {
            self.phase = SessionPhase::Idle;
        }
    }

    /// Returns the session to its initial state.
    pub fn clear(&mut self) {
        self.payload = None;
        self.decoder = None;
        self.cursor = 0;
        self.document.clear();
        self.revealed = false;
        self.phase = SessionPhase::Idle;
        debug!("session cleared");
    }
}
