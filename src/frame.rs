//! Decoded frames and container metadata.
//!
//! - `Frame`: one decoded RGB24 image with its zero-based index in the stream.
//! - `VideoMetadata`: dimensions, frame rate and frame count of a container.
//!
//! Frames are transient. A source produces a frame, the pipeline may annotate it
//! in place, the sink consumes it, and it is dropped. Nothing holds on to a frame
//! after it has been written.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Bytes per pixel for the RGB24 layout every frame uses.
pub const RGB_CHANNELS: usize = 3;

/// Container-level properties of an input or output video.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Frames per second. Always > 0 for an opened handle.
    pub frame_rate: f64,
    /// Frame count advertised by the container. 0 when the container does not know.
    pub total_frames: u64,
}

impl VideoMetadata {
    /// Expected byte length of one RGB24 frame with these dimensions.
    pub fn frame_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * RGB_CHANNELS
    }
}

/// One decoded RGB24 frame.
///
/// Pixel rows are tightly packed: `pixels.len() == width * height * 3`.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position in the stream.
    pub index: u64,
    frame_rate: f64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64, frame_rate: f64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} expected {} RGB bytes for {}x{}, received {}",
                index,
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            frame_rate,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Presentation time derived from the index and the stream frame rate.
    pub fn timestamp(&self) -> Duration {
        if self.frame_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.index as f64 / self.frame_rate)
    }

    /// SHA-256 of the pixel buffer. Used to compare frames without keeping them.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.pixels).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, 0, 30.0).is_err());
        assert!(Frame::new(vec![0u8; 48], 4, 4, 0, 30.0).is_ok());
    }

    #[test]
    fn timestamp_follows_index_and_rate() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 45, 30.0).unwrap();
        assert_eq!(frame.timestamp(), Duration::from_millis(1500));

        let unknown_rate = Frame::new(vec![0u8; 12], 2, 2, 45, 0.0).unwrap();
        assert_eq!(unknown_rate.timestamp(), Duration::ZERO);
    }

    #[test]
    fn digest_tracks_pixel_changes() {
        let mut frame = Frame::new(vec![7u8; 12], 2, 2, 0, 25.0).unwrap();
        let before = frame.digest();
        frame.pixels_mut()[0] = 8;
        assert_ne!(before, frame.digest());
    }

    #[test]
    fn metadata_frame_len() {
        let meta = VideoMetadata {
            width: 640,
            height: 480,
            frame_rate: 30.0,
            total_frames: 0,
        };
        assert_eq!(meta.frame_len(), 640 * 480 * 3);
    }
}
