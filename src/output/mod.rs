//! Frame sinks.
//!
//! A sink accepts frames in call order and produces a re-encoded container.
//! Call order is file order. `close()` must run once per job on every exit path,
//! otherwise the container is left without a trailer.

use anyhow::Result;

use crate::frame::Frame;

pub mod file;
#[cfg(feature = "media-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::FileSink;

/// Codec tag written by the FFmpeg sink (MPEG-4 Part 2).
pub const OUTPUT_CODEC_TAG: &str = "mp4v";

pub trait FrameSink: Send {
    /// Append one frame.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize and flush the container. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}
