//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a container and converts every frame to
//! packed RGB24. Frames buffered inside the decoder are drained once the demuxer
//! runs dry, so the source yields exactly as many frames as the stream holds.

use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;

use crate::frame::{Frame, VideoMetadata};

/// Rate assumed when the container advertises none.
const FALLBACK_FRAME_RATE: f64 = 30.0;

pub(crate) struct FfmpegFileSource {
    path: String,
    metadata: VideoMetadata,
    state: Option<DecodeState>,
    frames_decoded: u64,
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", path))?;
        let stream_index = input_stream.index();
        let frame_rate = stream_frame_rate(&input_stream);
        let total_frames = input_stream.frames().max(0) as u64;

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            frame_rate,
            total_frames,
        };
        log::info!(
            "FileSource: opened {} (ffmpeg, {:?})",
            path,
            decoder.id()
        );

        Ok(Self {
            path: path.to_string(),
            metadata,
            state: Some(DecodeState {
                input,
                stream_index,
                decoder,
                scaler,
                eof_sent: false,
            }),
            frames_decoded: 0,
        })
    }

    pub(crate) fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    pub(crate) fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(state) = self.state.as_mut() else {
            bail!("decoder for '{}' was released", self.path);
        };

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if state.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                state
                    .scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                let frame = Frame::new(
                    pixels,
                    width,
                    height,
                    self.frames_decoded,
                    self.metadata.frame_rate,
                )?;
                self.frames_decoded += 1;
                return Ok(Some(frame));
            }

            if state.eof_sent {
                return Ok(None);
            }

            let stream_index = state.stream_index;
            let packet = state
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => state
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    state
                        .decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    state.eof_sent = true;
                }
            }
        }
    }

    /// Drop the demuxer, decoder and scaler.
    pub(crate) fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!(
                "FileSource: released ffmpeg decoder for {} after {} frames",
                self.path,
                self.frames_decoded
            );
        }
    }
}

fn stream_frame_rate(stream: &ffmpeg::format::stream::Stream) -> f64 {
    for rate in [stream.avg_frame_rate(), stream.rate()] {
        if rate.numerator() > 0 && rate.denominator() > 0 {
            return f64::from(rate);
        }
    }
    log::warn!(
        "FileSource: stream advertises no frame rate, assuming {}",
        FALLBACK_FRAME_RATE
    );
    FALLBACK_FRAME_RATE
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
