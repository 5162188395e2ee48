// libs/call-session-cell/src/services/media.rs
//! Media source port: camera/microphone acquisition and per-track enable
//! toggles. Real capture lives in the consuming dashboard; the core only
//! depends on this thin contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{CallSessionError, MediaConstraints, MediaTrackKind};

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local capture. Denial or device failure is fatal for the
    /// current call attempt; the core never retries.
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Box<dyn MediaHandle>, CallSessionError>;
}

/// Exclusively owned capture handle. Released exactly once by the owning
/// session; `release` is idempotent and dropping the handle releases it.
pub trait MediaHandle: Send {
    fn set_track_enabled(&mut self, kind: MediaTrackKind, enabled: bool);
    fn is_track_enabled(&self, kind: MediaTrackKind) -> bool;
    fn release(&mut self);
}

// ==============================================================================
// IN-MEMORY MEDIA SOURCE
// ==============================================================================

/// Deviceless media source for tests and single-process demos. Keeps
/// acquire/release accounting so tests can assert exactly-once cleanup, and
/// can be configured to deny acquisition like a user rejecting the
/// camera/microphone prompt.
#[derive(Clone, Default)]
pub struct InMemoryMediaSource {
    deny: bool,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl InMemoryMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that rejects every acquisition.
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for InMemoryMediaSource {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Box<dyn MediaHandle>, CallSessionError> {
        if self.deny {
            return Err(CallSessionError::media(
                "camera/microphone permission denied",
            ));
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryMediaHandle {
            audio_enabled: constraints.audio,
            video_enabled: constraints.video,
            released: false,
            released_counter: Arc::clone(&self.released),
        }))
    }
}

struct InMemoryMediaHandle {
    audio_enabled: bool,
    video_enabled: bool,
    released: bool,
    released_counter: Arc<AtomicUsize>,
}

impl MediaHandle for InMemoryMediaHandle {
    fn set_track_enabled(&mut self, kind: MediaTrackKind, enabled: bool) {
        match kind {
            MediaTrackKind::Audio => self.audio_enabled = enabled,
            MediaTrackKind::Video => self.video_enabled = enabled,
        }
    }

    fn is_track_enabled(&self, kind: MediaTrackKind) -> bool {
        match kind {
            MediaTrackKind::Audio => self.audio_enabled,
            MediaTrackKind::Video => self.video_enabled,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.released_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for InMemoryMediaHandle {
    fn drop(&mut self) {
        self.release();
    }
}
