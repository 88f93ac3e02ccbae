//! Frame ingestion sources.
//!
//! - Local video files decoded with FFmpeg (feature: media-ffmpeg)
//! - Synthetic `stub://` clips (tests, demos)
//!
//! Every source yields frames lazily, in stream order, one decode at a time.
//! There is no read-ahead and a source cannot be rewound.

use anyhow::Result;

use crate::frame::{Frame, VideoMetadata};

pub mod file;
#[cfg(feature = "media-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub(crate) mod stub;

pub use file::FileSource;

/// Ordered, finite, non-restartable frame stream.
pub trait FrameSource: Send {
    /// Container properties captured at open time.
    fn metadata(&self) -> VideoMetadata;

    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the decoder. Calling it more than once is a no-op.
    fn close(&mut self);
}
