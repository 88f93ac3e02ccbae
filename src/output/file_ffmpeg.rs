//! Local file frame sink using FFmpeg.
//!
//! Encodes RGB24 frames as MPEG-4 Part 2 (`mp4v`) in YUV420P. The container is
//! picked by FFmpeg from the output file extension. Presentation timestamps are
//! frame indices in a `1 / frame_rate` time base.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::{codec, encoder, format, Packet, Rational};

use super::OUTPUT_CODEC_TAG;
use crate::frame::{Frame, RGB_CHANNELS};

pub(crate) struct FfmpegFileSink {
    path: String,
    output: format::context::Output,
    encoder: encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
}

impl FfmpegFileSink {
    pub(crate) fn new(path: &str, width: u32, height: u32, frame_rate: f64) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = format::output(&path)
            .with_context(|| format!("failed to create output '{}' with ffmpeg", path))?;
        let codec = encoder::find(codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg build has no MPEG-4 Part 2 encoder"))?;
        let global_header = output
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let rate = frame_rate_rational(frame_rate);
        let time_base = rate.invert();

        let mut stream = output.add_stream(codec).context("add output video stream")?;
        let stream_index = stream.index();

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder context")?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(time_base);
        video.set_frame_rate(Some(rate));
        if global_header {
            video.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }
        let encoder = video
            .open_as(codec)
            .context("open MPEG-4 Part 2 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        output
            .write_header()
            .with_context(|| format!("write container header for '{}'", path))?;
        let stream_time_base = output
            .stream(stream_index)
            .ok_or_else(|| anyhow!("output stream vanished after header write"))?
            .time_base();

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FileSink: writing {} ({}, {}x{} @ {}/{})",
            path,
            OUTPUT_CODEC_TAG,
            width,
            height,
            rate.numerator(),
            rate.denominator()
        );

        Ok(Self {
            path: path.to_string(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            width,
            height,
        })
    }

    pub(crate) fn write_frame(&mut self, frame: &Frame, position: u64) -> Result<()> {
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * RGB_CHANNELS;
        let stride = rgb.stride(0);
        let data = rgb.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            data.get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("scale frame to YUV420P")?;
        yuv.set_pts(Some(position as i64));

        self.encoder
            .send_frame(&yuv)
            .with_context(|| format!("encode frame {}", frame.index))?;
        self.drain_packets()
    }

    /// Flush buffered packets and write the container trailer.
    pub(crate) fn finish(&mut self) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .with_context(|| format!("write container trailer for '{}'", self.path))?;
        log::info!("FileSink: finalized {}", self.path);
        Ok(())
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

/// Map a float rate onto a rational the MPEG-4 encoder accepts
/// (time base denominators must stay below 2^16).
fn frame_rate_rational(frame_rate: f64) -> Rational {
    let whole = frame_rate.round();
    if (frame_rate - whole).abs() < 1e-3 {
        return Rational::new(whole as i32, 1);
    }
    let ntsc = frame_rate * 1.001;
    if (ntsc - ntsc.round()).abs() < 1e-2 {
        return Rational::new(ntsc.round() as i32 * 1000, 1001);
    }
    Rational::new((frame_rate * 1000.0).round() as i32, 1000)
}
