//! Local file frame source.
//!
//! This module provides `FileSource` for pulling frames from a local video file.
//! The file source is responsible for:
//! - Opening the file (failure here is fatal to the session)
//! - Decoding frames in order, converting them to RGB24
//! - Applying the configured frame stride
//! - Reporting end-of-file as `Ok(None)`
//!
//! Paths starting with `stub://` select a synthetic source that needs no decoder.
//! Query parameters tune it: `stub://lot?frames=120&width=320&height=240`.

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::{rgb_len, Frame};

const DEFAULT_SYNTHETIC_FRAMES: u64 = 300;
const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 480;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "test_images/parking.mp4") or a `stub://` URL.
    pub path: String,
    /// Hand out every Nth decoded frame. 1 keeps every frame.
    pub frame_stride: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            frame_stride: 1,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
    released: bool,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the source. Errors mean the video cannot be read at all.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): '{}'",
                config.path
            ));
        }
        if config.frame_stride == 0 {
            return Err(anyhow!("frame_stride must be >= 1"));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::new(config)?)
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::new(config)?)
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                return Err(anyhow!(
                    "cannot open '{}': file decoding requires the ingest-file-ffmpeg feature",
                    config.path
                ));
            }
        };
        let source = Self {
            backend,
            released: false,
        };
        log::info!("FileSource: opened {}", source.stats().path);
        Ok(source)
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        #[cfg(feature = "ingest-file-ffmpeg")]
        if let FileBackend::Ffmpeg(source) = &mut self.backend {
            source.close();
        }
        let stats = self.stats();
        log::info!(
            "FileSource: released {} after {} frames",
            stats.path,
            stats.frames_captured
        );
    }

    fn frames_captured(&self) -> u64 {
        self.stats().frames_captured
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    total_frames: u64,
    width: u32,
    height: u32,
    decoded: u64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Result<Self> {
        let mut total_frames = DEFAULT_SYNTHETIC_FRAMES;
        let mut width = DEFAULT_SYNTHETIC_WIDTH;
        let mut height = DEFAULT_SYNTHETIC_HEIGHT;
        if let Some(query) = config.path.split_once('?').map(|(_, q)| q) {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
                match key {
                    "frames" => {
                        total_frames = value.parse().context("stub frames must be an integer")?
                    }
                    "width" => width = value.parse().context("stub width must be an integer")?,
                    "height" => {
                        height = value.parse().context("stub height must be an integer")?
                    }
                    other => return Err(anyhow!("unknown stub parameter '{}'", other)),
                }
            }
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        Ok(Self {
            config,
            total_frames,
            width,
            height,
            decoded: 0,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.decoded >= self.total_frames {
                return Ok(None);
            }
            let position = self.decoded;
            self.decoded += 1;
            if position % self.config.frame_stride as u64 != 0 {
                continue;
            }
            let pixels = self.generate_synthetic_pixels(position)?;
            let frame = Frame::new(pixels, self.width, self.height, self.frame_count)?;
            self.frame_count += 1;
            return Ok(Some(frame));
        }
    }

    fn generate_synthetic_pixels(&self, position: u64) -> Result<Vec<u8>> {
        let mut pixels = vec![0u8; rgb_len(self.width, self.height)?];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + position) % 256) as u8;
        }
        Ok(pixels)
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(path: &str, frame_stride: u32) -> Result<FileSource> {
        FileSource::open(FileConfig {
            path: path.to_string(),
            frame_stride,
        })
    }

    #[test]
    fn synthetic_source_is_finite() -> Result<()> {
        let mut source = open("stub://lot?frames=3&width=4&height=2", 1)?;
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            assert_eq!((frame.width, frame.height), (4, 2));
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(source.frames_captured(), 3);
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn stride_skips_decoded_frames() -> Result<()> {
        let mut source = open("stub://lot?frames=10&width=2&height=2", 4)?;
        let mut count = 0;
        while source.next_frame()?.is_some() {
            count += 1;
        }
        // positions 0, 4, 8
        assert_eq!(count, 3);
        Ok(())
    }

    #[test]
    fn released_source_yields_nothing() -> Result<()> {
        let mut source = open("stub://lot?frames=5&width=2&height=2", 1)?;
        source.release();
        source.release();
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn rejects_remote_urls_and_bad_parameters() {
        assert!(open("rtsp://camera/stream", 1).is_err());
        assert!(open("", 1).is_err());
        assert!(open("stub://lot", 0).is_err());
        assert!(open("stub://lot?fps=3", 1).is_err());
        assert!(open("stub://lot?frames=x", 1).is_err());
        assert!(open("stub://lot?width=0", 1).is_err());
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn real_files_need_decoder_feature() {
        let err = open("parking.mp4", 1).err().unwrap();
        assert!(format!("{err}").contains("ingest-file-ffmpeg"));
    }
}
