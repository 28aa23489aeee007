//! Decoded video frames.
//!
//! - `Frame`: one row-major RGB24 image plus its position in the source.
//!
//! Frames are handed to the detector and dropped once the tracker has been
//! updated; nothing downstream keeps pixel data.

use anyhow::{anyhow, Result};

use crate::ingest::{normalize_to_rgb, PixelFormat};

/// One decoded frame. Pixels are always stored as RGB24.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position in the source sequence.
    pub index: u64,
}

impl Frame {
    /// Wrap RGB24 pixels. Fails when the buffer does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame {} length mismatch: expected {} RGB bytes, got {}",
                index,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    /// Convert pixels in `format` to RGB24 and wrap them.
    pub fn from_pixels(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        index: u64,
    ) -> Result<Self> {
        let rgb = normalize_to_rgb(pixels, width, height, format)?;
        Self::new(rgb, width, height, index)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
