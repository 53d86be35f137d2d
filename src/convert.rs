//! Format conversion: compressed decode and pixel-layout transforms.
//!
//! A [`FormatConverter`] is created for a fixed (input, output) pixel-format
//! pair. Frames are pushed in and converted frames are pulled out; a single
//! push may yield zero, one or several outputs because compressed codecs
//! can delay or reorder frames. Decoding and scaling are delegated to the
//! decoder provider (FFmpeg); YUYV and YUV420 to packed RGB also have
//! direct software paths.

use std::collections::VecDeque;
use std::sync::Once;

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use ffmpeg::software::scaling;
use ffmpeg::util::format::Pixel;

use crate::error::{Error, ErrorKind, Result};
use crate::format::{ColorChannel, PixelFormat};
use crate::frame::Frame;

static FFMPEG_INIT: Once = Once::new();

/// Initialize the decoder provider exactly once per process.
pub(crate) fn ensure_ffmpeg_initialized() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            tracing::error!("FFmpeg initialization failed: {}", e);
        }
    });
}

fn unsupported_conversion(input: PixelFormat, output: PixelFormat) -> Error {
    Error::new(ErrorKind::Parameter, "Unsupported conversion: {0} to {1}")
        .with_arg(0, input.to_string())
        .with_arg(1, output.to_string())
}

fn provider_error(context: &str, e: ffmpeg::Error) -> Error {
    Error::new(ErrorKind::Internal, "{0}: {1}")
        .with_arg(0, context)
        .with_arg(1, e.to_string())
}

fn clip8(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Metadata of a pushed frame, held until the decoder emits the matching
/// output (codecs may reorder or batch frames).
struct PendingMeta {
    pts: Option<i64>,
    timestamp_us: u64,
    decoder_timestamp_us: Option<i64>,
    keyframe: bool,
    extradata: Option<Bytes>,
}

impl PendingMeta {
    fn of(frame: &Frame) -> Self {
        Self {
            pts: Some(frame.timestamp_us() as i64),
            timestamp_us: frame.timestamp_us(),
            decoder_timestamp_us: frame.decoder_timestamp_us(),
            keyframe: frame.is_keyframe(),
            extradata: frame.codec_extradata().map(Bytes::copy_from_slice),
        }
    }

    fn apply(&self, frame: &mut Frame) {
        frame.set_timestamp_us(self.timestamp_us);
        if let Some(dts) = self.decoder_timestamp_us {
            frame.set_decoder_timestamp_us(dts);
        }
        frame.set_keyframe(self.keyframe);
        if let Some(extradata) = &self.extradata {
            frame.set_codec_extradata(extradata.clone());
        }
    }
}

/// Push/pull converter for one (input, output) pixel-format pair.
pub struct FormatConverter {
    input_format: PixelFormat,
    output_format: PixelFormat,
    /// Valid iff the input format is compressed.
    decoder: Option<ffmpeg::decoder::Video>,
    /// Valid once the first decoded frame told us the source layout.
    scaler: Option<scaling::Context>,
    scaler_src: Option<(Pixel, u32, u32)>,
    pending: VecDeque<PendingMeta>,
    ready: VecDeque<Frame>,
}

// The decoder and scaler contexts are used by at most one thread at a time;
// the converter is moved, never shared.
unsafe impl Send for FormatConverter {}

impl FormatConverter {
    /// Create a converter. Fails immediately for pairs outside the
    /// supported conversion matrix.
    pub fn new(input_format: PixelFormat, output_format: PixelFormat) -> Result<Self> {
        let decoder = if input_format.is_compressed() {
            if !matches!(
                output_format,
                PixelFormat::Rgb8 | PixelFormat::Yuv420 | PixelFormat::Yuyv
            ) {
                return Err(unsupported_conversion(input_format, output_format));
            }
            Some(Self::open_decoder(input_format)?)
        } else {
            let supported = input_format == output_format
                || matches!(
                    (input_format, output_format),
                    (PixelFormat::Yuyv, PixelFormat::Rgb8)
                        | (PixelFormat::Yuv420, PixelFormat::Rgb8)
                );
            if !supported {
                return Err(unsupported_conversion(input_format, output_format));
            }
            None
        };

        Ok(Self {
            input_format,
            output_format,
            decoder,
            scaler: None,
            scaler_src: None,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
        })
    }

    pub fn input_format(&self) -> PixelFormat {
        self.input_format
    }

    pub fn output_format(&self) -> PixelFormat {
        self.output_format
    }

    fn open_decoder(input_format: PixelFormat) -> Result<ffmpeg::decoder::Video> {
        ensure_ffmpeg_initialized();

        let codec_id = match input_format {
            PixelFormat::Mjpeg => ffmpeg::codec::Id::MJPEG,
            PixelFormat::H264 => ffmpeg::codec::Id::H264,
            PixelFormat::H265 => ffmpeg::codec::Id::HEVC,
            other => {
                return Err(
                    Error::new(ErrorKind::Parameter, "Not a compressed input format: {0}")
                        .with_arg(0, other.to_string()),
                )
            }
        };

        let codec = ffmpeg::decoder::find(codec_id).ok_or_else(|| {
            Error::new(ErrorKind::Internal, "No decoder available for {0}")
                .with_arg(0, input_format.to_string())
        })?;
        let context = ffmpeg::codec::context::Context::new_with_codec(codec);
        context
            .decoder()
            .video()
            .map_err(|e| provider_error("Cannot open decoder", e))
    }

    /// Push one frame. Converted output becomes available via
    /// [`FormatConverter::pull`]; a compressed push may produce nothing yet.
    pub fn push(&mut self, frame: &Frame) -> Result<()> {
        if frame.pixel_format() != self.input_format {
            return Err(
                Error::new(ErrorKind::Parameter, "Frame format {0} does not match converter input {1}")
                    .with_arg(0, frame.pixel_format().to_string())
                    .with_arg(1, self.input_format.to_string()),
            );
        }

        if self.decoder.is_some() {
            self.push_compressed(frame)
        } else {
            let converted = self.convert_raw(frame)?;
            self.ready.push_back(converted);
            Ok(())
        }
    }

    /// Dequeue the oldest converted frame.
    pub fn pull(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Signal end-of-stream to the decoder and drain delayed frames.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(decoder) = self.decoder.as_mut() {
            match decoder.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {}
                Err(e) => return Err(provider_error("Cannot flush decoder", e)),
            }
            self.drain_decoder()?;
        }
        Ok(())
    }

    // --- compressed path -------------------------------------------------

    fn push_compressed(&mut self, frame: &Frame) -> Result<()> {
        let payload = frame.compressed_data().ok_or_else(|| {
            Error::new(ErrorKind::Parameter, "Compressed frame has no compressed plane")
        })?;

        let mut packet = ffmpeg::Packet::copy(payload);
        packet.set_pts(Some(frame.timestamp_us() as i64));
        if let Some(dts) = frame.decoder_timestamp_us() {
            packet.set_dts(Some(dts));
        }

        self.pending.push_back(PendingMeta::of(frame));

        let decoder = self.decoder.as_mut().expect("compressed push without decoder");
        match decoder.send_packet(&packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN }) => {
                // Decoder wants draining first; fall through to drain.
            }
            Err(e) => {
                self.pending.pop_back();
                return Err(provider_error("Cannot decode frame", e));
            }
        }

        self.drain_decoder()
    }

    fn drain_decoder(&mut self) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            let decoder = self.decoder.as_mut().expect("drain without decoder");
            match decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let converted = self.scale_decoded(&decoded)?;
                    self.ready.push_back(converted);
                }
                Err(ffmpeg::Error::Eof)
                | Err(ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN }) => return Ok(()),
                Err(e) => return Err(provider_error("Cannot receive decoded frame", e)),
            }
        }
    }

    fn scale_decoded(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let dst_pixel = match self.output_format {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Yuv420 => Pixel::YUV420P,
            PixelFormat::Yuyv => Pixel::YUYV422,
            other => return Err(unsupported_conversion(self.input_format, other)),
        };

        let src = (decoded.format(), decoded.width(), decoded.height());
        if self.scaler_src != Some(src) {
            self.scaler = Some(
                scaling::Context::get(
                    decoded.format(),
                    decoded.width(),
                    decoded.height(),
                    dst_pixel,
                    decoded.width(),
                    decoded.height(),
                    scaling::Flags::BILINEAR,
                )
                .map_err(|e| provider_error("Cannot create scale context", e))?,
            );
            self.scaler_src = Some(src);
        }

        let mut scaled = ffmpeg::frame::Video::empty();
        self.scaler
            .as_mut()
            .expect("scaler must exist here")
            .run(decoded, &mut scaled)
            .map_err(|e| provider_error("Cannot scale frame", e))?;

        let mut frame = self.frame_from_planar(&scaled)?;
        self.apply_pending_meta(decoded.pts(), &mut frame);
        Ok(frame)
    }

    /// Recover the source metadata for a decoded frame. Reordering codecs
    /// emit frames with the PTS of an earlier push; fall back to FIFO order
    /// when the PTS does not match anything pending.
    fn apply_pending_meta(&mut self, pts: Option<i64>, frame: &mut Frame) {
        let index = pts
            .and_then(|pts| self.pending.iter().position(|m| m.pts == Some(pts)))
            .unwrap_or(0);

        if let Some(meta) = self.pending.remove(index) {
            meta.apply(frame);
        } else if let Some(pts) = pts {
            frame.set_timestamp_us(pts.max(0) as u64);
        }
    }

    fn frame_from_planar(&self, scaled: &ffmpeg::frame::Video) -> Result<Frame> {
        let width = scaled.width();
        let height = scaled.height();

        let mut frame = Frame::new();
        frame.set_format(self.output_format, width, height);

        match self.output_format {
            PixelFormat::Rgb8 => {
                frame.add_raw_plane(ColorChannel::Interleaved, 24)?;
                copy_into_plane(&mut frame, ColorChannel::Interleaved, scaled, 0, width as usize * 3)?;
            }
            PixelFormat::Yuyv => {
                frame.add_raw_plane(ColorChannel::Interleaved, 16)?;
                copy_into_plane(&mut frame, ColorChannel::Interleaved, scaled, 0, width as usize * 2)?;
            }
            PixelFormat::Yuv420 => {
                frame.add_raw_plane(ColorChannel::Y, 8)?;
                frame.add_raw_plane(ColorChannel::U, 8)?;
                frame.add_raw_plane(ColorChannel::V, 8)?;
                copy_into_plane(&mut frame, ColorChannel::Y, scaled, 0, width as usize)?;
                let chroma_row = width.div_ceil(2) as usize;
                copy_into_plane(&mut frame, ColorChannel::U, scaled, 1, chroma_row)?;
                copy_into_plane(&mut frame, ColorChannel::V, scaled, 2, chroma_row)?;
            }
            other => return Err(unsupported_conversion(self.input_format, other)),
        }

        Ok(frame)
    }

    // --- raw path --------------------------------------------------------

    fn convert_raw(&mut self, frame: &Frame) -> Result<Frame> {
        let mut converted = match (self.input_format, self.output_format) {
            (a, b) if a == b => frame.clone(),
            (PixelFormat::Yuyv, PixelFormat::Rgb8) => yuyv_to_rgb8(frame)?,
            (PixelFormat::Yuv420, PixelFormat::Rgb8) => yuv420_to_rgb8(frame)?,
            (a, b) => return Err(unsupported_conversion(a, b)),
        };
        converted.copy_metadata_from(frame);
        Ok(converted)
    }
}

/// Copy a plane out of an FFmpeg frame, dropping any stride padding.
fn copy_into_plane(
    frame: &mut Frame,
    channel: ColorChannel,
    src: &ffmpeg::frame::Video,
    plane_index: usize,
    row_bytes: usize,
) -> Result<()> {
    let src_stride = src.stride(plane_index);
    let src_data = src.data(plane_index);

    let plane = frame
        .plane_mut(channel)
        .ok_or_else(|| Error::new(ErrorKind::Internal, "Output plane missing"))?;
    let rows = plane.height() as usize;
    let dst_stride = plane.stride();
    let dst = plane.data_mut();

    for row in 0..rows {
        let src_row = &src_data[row * src_stride..row * src_stride + row_bytes];
        dst[row * dst_stride..row * dst_stride + row_bytes].copy_from_slice(src_row);
    }
    Ok(())
}

/// BT.601 limited-range YUYV to packed RGB8.
///
/// Chroma sample pairs serve two consecutive luma samples; an odd final
/// column reuses the last chroma pair.
fn yuyv_to_rgb8(input: &Frame) -> Result<Frame> {
    let width = input.width() as usize;
    let height = input.height() as usize;

    let src_plane = input
        .plane(ColorChannel::Interleaved)
        .ok_or_else(|| Error::new(ErrorKind::Parameter, "YUYV frame has no interleaved plane"))?;
    let src_stride = src_plane.stride();
    let src = src_plane.data();

    let mut out = Frame::new();
    out.set_format(PixelFormat::Rgb8, input.width(), input.height());
    out.add_raw_plane(ColorChannel::Interleaved, 24)?;

    let out_plane = out.plane_mut(ColorChannel::Interleaved).expect("plane just added");
    let out_stride = out_plane.stride();
    let dst = out_plane.data_mut();

    for y in 0..height {
        let src_row = &src[y * src_stride..];
        let dst_row = &mut dst[y * out_stride..];

        let mut x = 0;
        while x + 1 < width {
            let y1 = src_row[x * 2] as f32 - 16.0;
            let u = src_row[x * 2 + 1] as f32 - 128.0;
            let y2 = src_row[x * 2 + 2] as f32 - 16.0;
            let v = src_row[x * 2 + 3] as f32 - 128.0;

            write_rgb(&mut dst_row[3 * x..], y1, u, v);
            write_rgb(&mut dst_row[3 * (x + 1)..], y2, u, v);
            x += 2;
        }

        if width % 2 == 1 {
            let x = width - 1;
            let y1 = src_row[x * 2] as f32 - 16.0;
            let u = src_row[x * 2 + 1] as f32 - 128.0;
            let v = src_row[x * 2 + 3] as f32 - 128.0;
            write_rgb(&mut dst_row[3 * x..], y1, u, v);
        }
    }

    Ok(out)
}

/// BT.601 limited-range planar YUV 4:2:0 to packed RGB8.
fn yuv420_to_rgb8(input: &Frame) -> Result<Frame> {
    let width = input.width() as usize;
    let height = input.height() as usize;

    let missing = || Error::new(ErrorKind::Parameter, "YUV420 frame is missing a plane");
    let y_plane = input.plane(ColorChannel::Y).ok_or_else(missing)?;
    let u_plane = input.plane(ColorChannel::U).ok_or_else(missing)?;
    let v_plane = input.plane(ColorChannel::V).ok_or_else(missing)?;

    let mut out = Frame::new();
    out.set_format(PixelFormat::Rgb8, input.width(), input.height());
    out.add_raw_plane(ColorChannel::Interleaved, 24)?;

    let (y_data, y_stride) = (y_plane.data(), y_plane.stride());
    let (u_data, u_stride) = (u_plane.data(), u_plane.stride());
    let (v_data, v_stride) = (v_plane.data(), v_plane.stride());

    let out_plane = out.plane_mut(ColorChannel::Interleaved).expect("plane just added");
    let out_stride = out_plane.stride();
    let dst = out_plane.data_mut();

    for y in 0..height {
        for x in 0..width {
            let luma = y_data[y * y_stride + x] as f32 - 16.0;
            let u = u_data[(y / 2) * u_stride + x / 2] as f32 - 128.0;
            let v = v_data[(y / 2) * v_stride + x / 2] as f32 - 128.0;
            write_rgb(&mut dst[y * out_stride + 3 * x..], luma, u, v);
        }
    }

    Ok(out)
}

#[inline]
fn write_rgb(dst: &mut [u8], y: f32, u: f32, v: f32) {
    dst[0] = clip8(1.164 * y + 1.1596 * v);
    dst[1] = clip8(1.164 * y - 0.392 * u - 0.813 * v);
    dst[2] = clip8(1.164 * y + 2.017 * u);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuyv_frame(width: u32, height: u32, data: &[u8]) -> Frame {
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Yuyv, width, height);
        frame.add_raw_plane(ColorChannel::Interleaved, 16).unwrap();
        frame.copy_raw_plane(ColorChannel::Interleaved, data).unwrap();
        frame
    }

    #[test]
    fn yuyv_grey_converts_to_neutral_rgb() {
        // Y=128, U=V=128: both pixels become (130, 130, 130).
        let mut converter = FormatConverter::new(PixelFormat::Yuyv, PixelFormat::Rgb8).unwrap();
        let frame = yuyv_frame(2, 1, &[0x80, 0x80, 0x80, 0x80]);

        converter.push(&frame).unwrap();
        let out = converter.pull().unwrap();
        assert!(converter.pull().is_none());

        let plane = out.plane(ColorChannel::Interleaved).unwrap();
        assert_eq!(&plane.data()[..6], &[130, 130, 130, 130, 130, 130]);
    }

    #[test]
    fn yuyv_odd_width_reuses_last_chroma() {
        let mut converter = FormatConverter::new(PixelFormat::Yuyv, PixelFormat::Rgb8).unwrap();
        // 3 pixels: two chroma pairs, last pixel uses the second pair.
        let frame = yuyv_frame(3, 1, &[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80]);

        converter.push(&frame).unwrap();
        let out = converter.pull().unwrap();
        let plane = out.plane(ColorChannel::Interleaved).unwrap();
        assert_eq!(&plane.data()[..9], &[130u8; 9][..]);
    }

    #[test]
    fn yuv420_converts_to_rgb() {
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Yuv420, 2, 2);
        frame.add_raw_plane(ColorChannel::Y, 8).unwrap();
        frame.add_raw_plane(ColorChannel::U, 8).unwrap();
        frame.add_raw_plane(ColorChannel::V, 8).unwrap();
        frame.copy_raw_plane(ColorChannel::Y, &[128, 128, 128, 128]).unwrap();
        frame.copy_raw_plane(ColorChannel::U, &[128]).unwrap();
        frame.copy_raw_plane(ColorChannel::V, &[128]).unwrap();

        let mut converter = FormatConverter::new(PixelFormat::Yuv420, PixelFormat::Rgb8).unwrap();
        converter.push(&frame).unwrap();
        let out = converter.pull().unwrap();
        let plane = out.plane(ColorChannel::Interleaved).unwrap();
        assert_eq!(&plane.data()[..3], &[130, 130, 130]);
    }

    #[test]
    fn metadata_propagates_through_raw_conversion() {
        let mut converter = FormatConverter::new(PixelFormat::Yuyv, PixelFormat::Rgb8).unwrap();
        let mut frame = yuyv_frame(2, 1, &[0x80, 0x80, 0x80, 0x80]);
        frame.set_timestamp_us(42_000);
        frame.set_keyframe(false);
        frame.set_decoder_timestamp_us(41_000);
        frame.set_codec_extradata(vec![9u8, 9]);

        converter.push(&frame).unwrap();
        let out = converter.pull().unwrap();
        assert_eq!(out.timestamp_us(), 42_000);
        assert_eq!(out.decoder_timestamp_us(), Some(41_000));
        assert!(!out.is_keyframe());
        assert_eq!(out.codec_extradata(), Some(&[9u8, 9][..]));
    }

    #[test]
    fn identity_conversion_passes_frames_through() {
        let mut converter = FormatConverter::new(PixelFormat::Yuyv, PixelFormat::Yuyv).unwrap();
        let mut frame = yuyv_frame(2, 2, &[0x80; 16]);
        frame.set_timestamp_us(7);
        converter.push(&frame).unwrap();

        let out = converter.pull().unwrap();
        assert_eq!(out.timestamp_us(), 7);
        assert_eq!(out.pixel_format(), PixelFormat::Yuyv);
    }

    #[test]
    fn rejects_unsupported_pairs() {
        let err = FormatConverter::new(PixelFormat::Rggb8, PixelFormat::Rgb8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(err.formatted_message().contains("RGGB8"));

        assert!(FormatConverter::new(PixelFormat::Rgb8, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn rejects_mismatched_input_frame() {
        let mut converter = FormatConverter::new(PixelFormat::Yuyv, PixelFormat::Rgb8).unwrap();
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Rgb8, 2, 2);
        assert!(converter.push(&frame).is_err());
    }

    #[test]
    fn clip8_truncates_like_the_reference() {
        assert_eq!(clip8(130.368), 130);
        assert_eq!(clip8(-3.0), 0);
        assert_eq!(clip8(270.0), 255);
    }
}
