//! Frame ingestion sources.
//!
//! This module provides the sources a session pulls frames from:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` lots (testing, demos)
//! - In-memory frame lists (embedding, tests)
//!
//! A source yields a finite, non-restartable sequence. `Ok(None)` marks the
//! normal end of the sequence; `Err` is a real decode or I/O failure.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod normalize;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{FileConfig, FileSource, FileStats};
pub use normalize::PixelFormat;
pub(crate) use normalize::normalize_to_rgb;

/// A lazily decoded, finite sequence of frames.
pub trait FrameSource {
    /// Next frame, or `None` once the sequence is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn release(&mut self);

    /// Frames handed out so far.
    fn frames_captured(&self) -> u64;
}

/// Source over frames already in memory.
pub struct MemorySource {
    frames: std::vec::IntoIter<Frame>,
    captured: u64,
    released: bool,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into_iter(),
            captured: 0,
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        let frame = self.frames.next();
        if frame.is_some() {
            self.captured += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn frames_captured(&self) -> u64 {
        self.captured
    }
}
