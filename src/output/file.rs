//! Local file frame sink.
//!
//! `FileSink` re-encodes frames into a local container at the input's resolution
//! and frame rate. `stub://` targets discard pixels but keep a SHA-256 digest per
//! written frame, which lets tests and dry runs verify output order and content.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

#[cfg(feature = "media-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSink;
use super::FrameSink;
use crate::frame::Frame;
use crate::ingest::stub::is_stub;

/// Local file frame sink.
pub struct FileSink {
    backend: SinkBackend,
    width: u32,
    height: u32,
    frames_written: u64,
    closed: bool,
}

enum SinkBackend {
    Digest(DigestSink),
    #[cfg(feature = "media-ffmpeg")]
    Ffmpeg(FfmpegFileSink),
}

impl FileSink {
    /// Create the output container.
    pub fn create(path: &str, width: u32, height: u32, frame_rate: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("output dimensions must be non-zero"));
        }
        if !(frame_rate > 0.0) {
            return Err(anyhow!("output frame rate must be > 0"));
        }
        if path.trim().is_empty() {
            return Err(anyhow!("output path is empty"));
        }

        let backend = if is_stub(path) {
            SinkBackend::Digest(DigestSink::default())
        } else {
            if path.contains("://") {
                return Err(anyhow!(
                    "output only supports local paths (no URL schemes): '{}'",
                    path
                ));
            }
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(anyhow!(
                        "output directory '{}' does not exist",
                        parent.display()
                    ));
                }
            }
            Self::encoder_backend(path, width, height, frame_rate)?
        };

        log::debug!(
            "FileSink: created {} ({}x{} @ {:.2} fps)",
            path,
            width,
            height,
            frame_rate
        );
        Ok(Self {
            backend,
            width,
            height,
            frames_written: 0,
            closed: false,
        })
    }

    #[cfg(feature = "media-ffmpeg")]
    fn encoder_backend(path: &str, width: u32, height: u32, frame_rate: f64) -> Result<SinkBackend> {
        Ok(SinkBackend::Ffmpeg(FfmpegFileSink::new(
            path, width, height, frame_rate,
        )?))
    }

    #[cfg(not(feature = "media-ffmpeg"))]
    fn encoder_backend(path: &str, _width: u32, _height: u32, _frame_rate: f64) -> Result<SinkBackend> {
        Err(anyhow!(
            "encoding '{}' requires the media-ffmpeg feature",
            path
        ))
    }

    /// Per-frame digests recorded by a `stub://` sink, in write order.
    pub fn frame_digests(&self) -> Option<&[[u8; 32]]> {
        match &self.backend {
            SinkBackend::Digest(sink) => Some(&sink.frames),
            #[cfg(feature = "media-ffmpeg")]
            SinkBackend::Ffmpeg(_) => None,
        }
    }

    /// Digest over the whole written stream of a `stub://` sink.
    pub fn stream_digest(&self) -> Option<String> {
        self.frame_digests().map(|frames| {
            let mut hasher = Sha256::new();
            for digest in frames {
                hasher.update(digest);
            }
            hex::encode(hasher.finalize())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSink for FileSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(anyhow!("frame sink is closed"));
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame {} is {}x{}, sink expects {}x{}",
                frame.index,
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        match &mut self.backend {
            SinkBackend::Digest(sink) => sink.frames.push(frame.digest()),
            #[cfg(feature = "media-ffmpeg")]
            SinkBackend::Ffmpeg(sink) => sink.write_frame(frame, self.frames_written)?,
        }
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // Marked first so a failing finalize is not retried by Drop.
        self.closed = true;
        match &mut self.backend {
            SinkBackend::Digest(_) => {}
            #[cfg(feature = "media-ffmpeg")]
            SinkBackend::Ffmpeg(sink) => sink.finish()?,
        }
        log::debug!("FileSink: closed after {} frames", self.frames_written);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("FileSink: finalize on drop failed: {:#}", err);
        }
    }
}

#[derive(Default)]
struct DigestSink {
    frames: Vec<[u8; 32]>,
}
