//! Local file frame source.
//!
//! `FileSource` opens a local video container and hands out decoded frames in
//! stream order. Paths starting with `stub://` produce a deterministic synthetic
//! clip instead, which keeps tests independent of codec availability.

use anyhow::{anyhow, Result};
use std::path::Path;

#[cfg(feature = "media-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::stub::{is_stub, parse_stub, StubLocator};
use super::FrameSource;
use crate::frame::{Frame, VideoMetadata};

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
    closed: bool,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "media-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open `path` for decoding.
    pub fn open(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(anyhow!("input path is empty"));
        }
        if is_stub(path) {
            let locator = parse_stub(path)?;
            return Ok(Self::from_backend(FileBackend::Synthetic(
                SyntheticFileSource::new(locator),
            )));
        }
        if path.contains("://") {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): '{}'",
                path
            ));
        }
        if !Path::new(path).is_file() {
            return Err(anyhow!("input file '{}' does not exist", path));
        }

        #[cfg(feature = "media-ffmpeg")]
        {
            Ok(Self::from_backend(FileBackend::Ffmpeg(
                FfmpegFileSource::new(path)?,
            )))
        }
        #[cfg(not(feature = "media-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding '{}' requires the media-ffmpeg feature",
                path
            ))
        }
    }

    fn from_backend(backend: FileBackend) -> Self {
        let source = Self {
            backend,
            closed: false,
        };
        let meta = source.metadata();
        log::debug!(
            "FileSource: opened {}x{} @ {:.2} fps, {} frames advertised",
            meta.width,
            meta.height,
            meta.frame_rate,
            meta.total_frames
        );
        source
    }

    /// Number of frames handed out so far.
    pub fn frames_decoded(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.next_index,
            #[cfg(feature = "media-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_decoded(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSource for FileSource {
    fn metadata(&self) -> VideoMetadata {
        match &self.backend {
            FileBackend::Synthetic(source) => source.metadata(),
            #[cfg(feature = "media-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.metadata(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(anyhow!("frame source is closed"));
        }
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "media-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        #[cfg(feature = "media-ffmpeg")]
        {
            if let FileBackend::Ffmpeg(source) = &mut self.backend {
                source.release();
            }
        }
        log::debug!("FileSource: closed after {} frames", self.frames_decoded());
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    locator: StubLocator,
    next_index: u64,
}

impl SyntheticFileSource {
    fn new(locator: StubLocator) -> Self {
        Self {
            locator,
            next_index: 0,
        }
    }

    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            width: self.locator.width,
            height: self.locator.height,
            frame_rate: self.locator.fps,
            total_frames: self.locator.frames,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.locator.frames {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        let pixels = synthetic_pixels(self.metadata().frame_len(), index);
        Frame::new(
            pixels,
            self.locator.width,
            self.locator.height,
            index,
            self.locator.fps,
        )
        .map(Some)
    }
}

/// Deterministic gradient that shifts every frame, so consecutive frames differ.
pub(crate) fn synthetic_pixels(len: usize, index: u64) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 + index * 7) % 256) as u8)
        .collect()
}
