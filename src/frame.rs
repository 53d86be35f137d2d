//! Video frame data structures.
//!
//! A [`Frame`] owns a set of pixel planes keyed by [`ColorChannel`]. Plane
//! memory is either owned by the frame or a reference-counted view of an
//! externally-managed allocation; the frame never frees external memory,
//! it only drops its handle.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, Result};
use crate::format::{ChannelFormat, ColorChannel, PixelFormat};

/// Default row alignment for owned planes, in bytes.
const DEFAULT_STRIDE_ALIGN: usize = 16;

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[derive(Debug)]
enum PlaneData {
    Owned(Vec<u8>),
    External(Bytes),
}

/// One plane of a frame.
#[derive(Debug)]
pub struct Plane {
    width: u32,
    height: u32,
    /// Row stride in bytes. For compressed planes this holds the payload
    /// byte length instead.
    stride: usize,
    format: ChannelFormat,
    bits_per_pixel: u32,
    data: PlaneData,
}

impl Plane {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn channel_format(&self) -> ChannelFormat {
        self.format
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    pub fn data(&self) -> &[u8] {
        match &self.data {
            PlaneData::Owned(vec) => vec,
            PlaneData::External(bytes) => bytes,
        }
    }

    /// Mutable plane bytes. An external plane is promoted to an owned copy
    /// first, so the externally-managed buffer is never written through.
    pub fn data_mut(&mut self) -> &mut [u8] {
        if let PlaneData::External(bytes) = &self.data {
            self.data = PlaneData::Owned(bytes.to_vec());
        }
        match &mut self.data {
            PlaneData::Owned(vec) => vec,
            PlaneData::External(_) => unreachable!(),
        }
    }

    fn deep_clone(&self) -> Plane {
        Plane {
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
            bits_per_pixel: self.bits_per_pixel,
            data: PlaneData::Owned(self.data().to_vec()),
        }
    }
}

/// A video frame: planes plus presentation metadata.
#[derive(Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    planes: BTreeMap<ColorChannel, Plane>,
    /// Presentation timestamp in microseconds, from the source clock.
    timestamp_us: u64,
    /// Decoder timestamp in microseconds, where the source distinguishes it.
    decoder_timestamp_us: Option<i64>,
    keyframe: bool,
    /// Codec setup data (SPS/PPS/VPS), carried on keyframes of compressed
    /// streams.
    codec_extradata: Option<Bytes>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Undefined,
            planes: BTreeMap::new(),
            timestamp_us: 0,
            decoder_timestamp_us: None,
            keyframe: true,
            codec_extradata: None,
        }
    }

    /// Set base pixel format and dimensions. Must precede plane addition.
    pub fn set_format(&mut self, pixel_format: PixelFormat, width: u32, height: u32) {
        self.pixel_format = pixel_format;
        self.width = width;
        self.height = height;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Chroma plane dimensions for the frame's subsampling.
    fn chroma_size(&self) -> Result<(u32, u32)> {
        match self.pixel_format {
            PixelFormat::Yuv420 => Ok((self.width.div_ceil(2), self.height.div_ceil(2))),
            PixelFormat::Yuyv => Ok((self.width.div_ceil(2), self.height)),
            other => Err(Error::new(
                ErrorKind::Usage,
                "Pixel format {0} has no separate chroma planes",
            )
            .with_arg(0, other.to_string())),
        }
    }

    /// Add an owned plane with automatic dimensions: chroma planes follow
    /// the pixel-format subsampling, all other channels use the frame size.
    pub fn add_raw_plane(&mut self, channel: ColorChannel, bits_per_pixel: u32) -> Result<()> {
        let (width, height) = match channel {
            ColorChannel::U | ColorChannel::V => self.chroma_size()?,
            ColorChannel::Compressed => {
                return Err(Error::new(
                    ErrorKind::Usage,
                    "Compressed planes must be added with add_compressed_plane",
                ))
            }
            _ => (self.width, self.height),
        };
        self.add_raw_plane_with_size(channel, width, height, bits_per_pixel)
    }

    /// Add an owned plane with custom dimensions (auxiliary planes such as
    /// depth maps).
    pub fn add_raw_plane_with_size(
        &mut self,
        channel: ColorChannel,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
    ) -> Result<()> {
        self.check_new_plane(channel)?;

        let bytes_per_pixel = (bits_per_pixel as usize + 7) / 8;
        let stride = align_up(width as usize * bytes_per_pixel, DEFAULT_STRIDE_ALIGN);

        self.planes.insert(
            channel,
            Plane {
                width,
                height,
                stride,
                format: ChannelFormat::Pixels,
                bits_per_pixel,
                data: PlaneData::Owned(vec![0u8; stride * height as usize]),
            },
        );
        Ok(())
    }

    /// Add a plane backed by an externally-managed buffer. The frame keeps
    /// a handle to the buffer but never frees the underlying memory.
    pub fn add_external_raw_plane(
        &mut self,
        channel: ColorChannel,
        buffer: Bytes,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        stride: usize,
    ) -> Result<()> {
        self.check_new_plane(channel)?;

        if buffer.len() < stride * height as usize {
            return Err(Error::new(
                ErrorKind::Parameter,
                "External plane buffer is too small: {0} < {1}",
            )
            .with_arg(0, buffer.len().to_string())
            .with_arg(1, (stride * height as usize).to_string()));
        }

        self.planes.insert(
            channel,
            Plane {
                width,
                height,
                stride,
                format: ChannelFormat::Pixels,
                bits_per_pixel,
                data: PlaneData::External(buffer),
            },
        );
        Ok(())
    }

    /// Add a compressed-payload plane. The payload is copied and the plane
    /// stride field holds the payload byte length.
    pub fn add_compressed_plane(
        &mut self,
        channel: ColorChannel,
        format: ChannelFormat,
        bits_per_pixel: u32,
        payload: &[u8],
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.check_new_plane(channel)?;

        self.planes.insert(
            channel,
            Plane {
                width,
                height,
                stride: payload.len(),
                format,
                bits_per_pixel,
                data: PlaneData::Owned(payload.to_vec()),
            },
        );
        Ok(())
    }

    /// Copy tightly-packed pixel rows into an already-added plane,
    /// respecting the plane stride.
    pub fn copy_raw_plane(&mut self, channel: ColorChannel, src: &[u8]) -> Result<()> {
        let pixel_format = self.pixel_format;
        let plane = self.planes.get_mut(&channel).ok_or_else(|| {
            Error::new(ErrorKind::Usage, "Frame has no plane for channel {0}")
                .with_arg(0, format!("{channel:?}"))
        })?;

        let bytes_per_pixel = (plane.bits_per_pixel as usize + 7) / 8;
        // A YUYV row always holds whole chroma pairs, so an odd width still
        // occupies ceil(w/2) four-byte groups.
        let row_bytes = match (pixel_format, channel) {
            (PixelFormat::Yuyv, ColorChannel::Interleaved) => {
                plane.width.div_ceil(2) as usize * 4
            }
            _ => plane.width as usize * bytes_per_pixel,
        };
        let height = plane.height as usize;

        if src.len() < row_bytes * height {
            return Err(Error::new(
                ErrorKind::Parameter,
                "Source buffer is too small: {0} < {1}",
            )
            .with_arg(0, src.len().to_string())
            .with_arg(1, (row_bytes * height).to_string()));
        }

        let stride = plane.stride;
        let dst = plane.data_mut();
        for row in 0..height {
            dst[row * stride..row * stride + row_bytes]
                .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
        }
        Ok(())
    }

    pub fn has_plane(&self, channel: ColorChannel) -> bool {
        self.planes.contains_key(&channel)
    }

    pub fn plane(&self, channel: ColorChannel) -> Option<&Plane> {
        self.planes.get(&channel)
    }

    pub fn plane_mut(&mut self, channel: ColorChannel) -> Option<&mut Plane> {
        self.planes.get_mut(&channel)
    }

    pub fn planes(&self) -> impl Iterator<Item = (ColorChannel, &Plane)> {
        self.planes.iter().map(|(c, p)| (*c, p))
    }

    /// Payload of the compressed plane, if this is a compressed frame.
    pub fn compressed_data(&self) -> Option<&[u8]> {
        self.planes
            .get(&ColorChannel::Compressed)
            .map(|p| &p.data()[..p.stride])
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn set_timestamp_us(&mut self, timestamp_us: u64) {
        self.timestamp_us = timestamp_us;
    }

    pub fn decoder_timestamp_us(&self) -> Option<i64> {
        self.decoder_timestamp_us
    }

    pub fn set_decoder_timestamp_us(&mut self, dts_us: i64) {
        self.decoder_timestamp_us = Some(dts_us);
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.keyframe = keyframe;
    }

    pub fn codec_extradata(&self) -> Option<&[u8]> {
        self.codec_extradata.as_deref()
    }

    pub fn set_codec_extradata(&mut self, extradata: impl Into<Bytes>) {
        self.codec_extradata = Some(extradata.into());
    }

    /// Copy timestamp, keyframe flag, decoder timestamp and extradata from
    /// another frame.
    pub fn copy_metadata_from(&mut self, other: &Frame) {
        self.timestamp_us = other.timestamp_us;
        self.decoder_timestamp_us = other.decoder_timestamp_us;
        self.keyframe = other.keyframe;
        self.codec_extradata = other.codec_extradata.clone();
    }

    fn check_new_plane(&self, channel: ColorChannel) -> Result<()> {
        if self.pixel_format == PixelFormat::Undefined {
            return Err(Error::new(
                ErrorKind::Usage,
                "set_format must be called before adding planes",
            ));
        }
        if self.planes.contains_key(&channel) {
            return Err(
                Error::new(ErrorKind::Usage, "Frame already has a plane for channel {0}")
                    .with_arg(0, format!("{channel:?}")),
            );
        }
        Ok(())
    }
}

// Cloning a frame always produces owned plane memory; external planes are
// copied rather than shared.
impl Clone for Frame {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            planes: self
                .planes
                .iter()
                .map(|(c, p)| (*c, p.deep_clone()))
                .collect(),
            timestamp_us: self.timestamp_us,
            decoder_timestamp_us: self.decoder_timestamp_us,
            keyframe: self.keyframe,
            codec_extradata: self.codec_extradata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_plane_is_stride_aligned() {
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Rgb8, 33, 10);
        frame.add_raw_plane(ColorChannel::Interleaved, 24).unwrap();

        let plane = frame.plane(ColorChannel::Interleaved).unwrap();
        // 33 px * 3 bytes = 99, rounded up to the next multiple of 16.
        assert_eq!(plane.stride(), 112);
        assert!(plane.data().len() >= plane.stride() * plane.height() as usize);
    }

    #[test]
    fn chroma_planes_follow_subsampling() {
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Yuv420, 641, 481);
        frame.add_raw_plane(ColorChannel::Y, 8).unwrap();
        frame.add_raw_plane(ColorChannel::U, 8).unwrap();
        frame.add_raw_plane(ColorChannel::V, 8).unwrap();

        let u = frame.plane(ColorChannel::U).unwrap();
        assert_eq!((u.width(), u.height()), (321, 241));
        let y = frame.plane(ColorChannel::Y).unwrap();
        assert_eq!((y.width(), y.height()), (641, 481));
    }

    #[test]
    fn compressed_plane_stride_is_payload_length() {
        let payload = vec![0xFFu8, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Mjpeg, 640, 480);
        frame
            .add_compressed_plane(
                ColorChannel::Compressed,
                ChannelFormat::CompressedMjpeg,
                8,
                &payload,
                640,
                480,
            )
            .unwrap();

        let plane = frame.plane(ColorChannel::Compressed).unwrap();
        assert_eq!(plane.stride(), payload.len());
        assert_eq!(frame.compressed_data().unwrap(), &payload[..]);
    }

    #[test]
    fn copy_raw_plane_respects_stride() {
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Rgb8, 5, 2);
        frame.add_raw_plane(ColorChannel::Interleaved, 24).unwrap();

        let src: Vec<u8> = (0..30).collect();
        frame.copy_raw_plane(ColorChannel::Interleaved, &src).unwrap();

        let plane = frame.plane(ColorChannel::Interleaved).unwrap();
        assert_eq!(&plane.data()[..15], &src[..15]);
        assert_eq!(&plane.data()[plane.stride()..plane.stride() + 15], &src[15..]);
    }

    #[test]
    fn external_plane_is_not_freed_and_clones_owned() {
        let backing = Bytes::from(vec![7u8; 16 * 4]);
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Rggb8, 16, 4);
        frame
            .add_external_raw_plane(ColorChannel::Interleaved, backing.clone(), 16, 4, 8, 16)
            .unwrap();

        let copy = frame.clone();
        drop(frame);
        // The external backing is still alive and unchanged.
        assert_eq!(backing[0], 7);
        assert_eq!(copy.plane(ColorChannel::Interleaved).unwrap().data()[0], 7);
    }

    #[test]
    fn mutating_external_plane_promotes_to_owned() {
        let backing = Bytes::from(vec![1u8; 64]);
        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Rggb8, 16, 4);
        frame
            .add_external_raw_plane(ColorChannel::Interleaved, backing.clone(), 16, 4, 8, 16)
            .unwrap();

        frame.plane_mut(ColorChannel::Interleaved).unwrap().data_mut()[0] = 99;
        assert_eq!(backing[0], 1);
        assert_eq!(frame.plane(ColorChannel::Interleaved).unwrap().data()[0], 99);
    }

    #[test]
    fn metadata_copy_carries_all_fields() {
        let mut src = Frame::new();
        src.set_timestamp_us(123_456);
        src.set_decoder_timestamp_us(123_000);
        src.set_keyframe(false);
        src.set_codec_extradata(vec![1u8, 2, 3]);

        let mut dst = Frame::new();
        dst.copy_metadata_from(&src);
        assert_eq!(dst.timestamp_us(), 123_456);
        assert_eq!(dst.decoder_timestamp_us(), Some(123_000));
        assert!(!dst.is_keyframe());
        assert_eq!(dst.codec_extradata(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn keyframe_defaults_to_true() {
        assert!(Frame::new().is_keyframe());
    }
}
