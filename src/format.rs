//! Pixel format, channel and framerate definitions.
//!
//! The numeric values of [`PixelFormat`] and [`ChannelFormat`] are stable
//! wire values and must not be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc::FourCC;

/// Supported pixel formats.
///
/// Values below 500 describe raw pixel layouts, values from 500 upward
/// describe compressed bitstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    #[serde(rename = "unknown")]
    Undefined = 0,
    /// Packed RGB, 8 bits per component, interleaved.
    #[serde(rename = "RGB8")]
    Rgb8 = 1,
    /// Planar RGB, 8 bits per component.
    #[serde(rename = "RGB8_planar")]
    Rgb8Planar = 2,
    /// Planar YUV 4:2:0.
    #[serde(rename = "YUV420")]
    Yuv420 = 100,
    /// Interleaved YUYV 4:2:2.
    #[serde(rename = "YUYV")]
    Yuyv = 101,
    /// Bayer RGGB, 8 bits per sample.
    #[serde(rename = "RGGB8")]
    Rggb8 = 200,
    #[serde(rename = "MJPEG")]
    Mjpeg = 500,
    #[serde(rename = "H264")]
    H264 = 501,
    #[serde(rename = "H265")]
    H265 = 502,
}

impl PixelFormat {
    /// Stable numeric wire value.
    pub fn wire_value(&self) -> u32 {
        *self as u32
    }

    /// Check whether this format is a compressed bitstream.
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg | PixelFormat::H264 | PixelFormat::H265)
    }

    /// Coarse class of this format, for display purposes.
    pub fn class(&self) -> PixelFormatClass {
        match self {
            PixelFormat::Undefined => PixelFormatClass::Unknown,
            PixelFormat::Rgb8 | PixelFormat::Rgb8Planar | PixelFormat::Rggb8 => {
                PixelFormatClass::Rgb
            }
            PixelFormat::Yuv420 | PixelFormat::Yuyv => PixelFormatClass::Yuv,
            PixelFormat::Mjpeg => PixelFormatClass::Mjpeg,
            PixelFormat::H264 => PixelFormatClass::H264,
            PixelFormat::H265 => PixelFormatClass::H265,
        }
    }

    /// Convert to the V4L2 FOURCC used to request this format from a driver.
    ///
    /// Returns `None` for formats with no single canonical FOURCC.
    pub fn to_fourcc(&self) -> Option<FourCC> {
        match self {
            PixelFormat::Yuyv => Some(FourCC::new(b"YUYV")),
            PixelFormat::Yuv420 => Some(FourCC::new(b"YU12")),
            PixelFormat::Rgb8 => Some(FourCC::new(b"RGB3")),
            PixelFormat::Rggb8 => Some(FourCC::new(b"RGGB")),
            PixelFormat::Mjpeg => Some(FourCC::new(b"MJPG")),
            PixelFormat::H264 => Some(FourCC::new(b"H264")),
            PixelFormat::H265 => Some(FourCC::new(b"HEVC")),
            PixelFormat::Undefined | PixelFormat::Rgb8Planar => None,
        }
    }

    /// Try to map a V4L2 FOURCC to a pixel format.
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"YU12" | b"I420" => Some(PixelFormat::Yuv420),
            b"RGB3" => Some(PixelFormat::Rgb8),
            b"RGGB" => Some(PixelFormat::Rggb8),
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            b"H264" => Some(PixelFormat::H264),
            b"HEVC" => Some(PixelFormat::H265),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Undefined => "unknown",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Rgb8Planar => "RGB8_planar",
            PixelFormat::Yuv420 => "YUV420",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Rggb8 => "RGGB8",
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::H264 => "H264",
            PixelFormat::H265 => "H265",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RGB8" => Ok(PixelFormat::Rgb8),
            "RGB8_planar" => Ok(PixelFormat::Rgb8Planar),
            "YUV420" => Ok(PixelFormat::Yuv420),
            "YUYV" => Ok(PixelFormat::Yuyv),
            "RGGB8" => Ok(PixelFormat::Rggb8),
            "MJPEG" => Ok(PixelFormat::Mjpeg),
            "H264" => Ok(PixelFormat::H264),
            "H265" => Ok(PixelFormat::H265),
            "unknown" => Ok(PixelFormat::Undefined),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Coarse pixel format class, for user-visible listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormatClass {
    Unknown = 0,
    Rgb = 1,
    Yuv = 2,
    Mjpeg = 3,
    H264 = 4,
    H265 = 5,
}

impl PixelFormatClass {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormatClass::Unknown => "unknown",
            PixelFormatClass::Rgb => "RGB",
            PixelFormatClass::Yuv => "YUV",
            PixelFormatClass::Mjpeg => "MJPEG",
            PixelFormatClass::H264 => "H264",
            PixelFormatClass::H265 => "H265",
        }
    }
}

impl fmt::Display for PixelFormatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data format of a single frame plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFormat {
    Undefined = 0,
    Pixels = 1,
    CompressedMjpeg = 500,
    CompressedH264 = 501,
    CompressedH265 = 502,
}

impl ChannelFormat {
    pub fn wire_value(&self) -> u32 {
        *self as u32
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, ChannelFormat::Undefined | ChannelFormat::Pixels)
    }
}

/// Key identifying a plane within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColorChannel {
    R,
    G,
    B,
    Y,
    U,
    V,
    Alpha,
    Depth,
    /// All components interleaved in a single plane (packed RGB, YUYV, Bayer).
    Interleaved,
    /// Compressed bitstream payload.
    Compressed,
}

/// A framerate (or other ratio) as an exact fraction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            f64::from(self.numerator) / f64::from(self.denominator)
        }
    }
}

// Fractions compare by ratio: 50/2 equals 25/1.
impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        u64::from(self.numerator) * u64::from(other.denominator)
            == u64::from(other.numerator) * u64::from(self.denominator)
    }
}

impl Eq for Fraction {}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(PixelFormat::Undefined.wire_value(), 0);
        assert_eq!(PixelFormat::Rgb8.wire_value(), 1);
        assert_eq!(PixelFormat::Rgb8Planar.wire_value(), 2);
        assert_eq!(PixelFormat::Yuv420.wire_value(), 100);
        assert_eq!(PixelFormat::Yuyv.wire_value(), 101);
        assert_eq!(PixelFormat::Rggb8.wire_value(), 200);
        assert_eq!(PixelFormat::Mjpeg.wire_value(), 500);
        assert_eq!(PixelFormat::H264.wire_value(), 501);
        assert_eq!(PixelFormat::H265.wire_value(), 502);

        assert_eq!(ChannelFormat::Pixels.wire_value(), 1);
        assert_eq!(ChannelFormat::CompressedH265.wire_value(), 502);
    }

    #[test]
    fn fourcc_round_trip() {
        for format in [
            PixelFormat::Yuyv,
            PixelFormat::Mjpeg,
            PixelFormat::H264,
            PixelFormat::Rggb8,
        ] {
            let fourcc = format.to_fourcc().unwrap();
            assert_eq!(PixelFormat::from_fourcc(fourcc), Some(format));
        }
    }

    #[test]
    fn fraction_compares_by_ratio() {
        assert_eq!(Fraction::new(25, 1), Fraction::new(50, 2));
        assert_ne!(Fraction::new(30, 1), Fraction::new(25, 1));
        assert_eq!(Fraction::new(30000, 1001).to_string(), "30000/1001");
    }

    #[test]
    fn format_names_parse_back() {
        for format in [
            PixelFormat::Rgb8,
            PixelFormat::Yuv420,
            PixelFormat::Yuyv,
            PixelFormat::Rggb8,
            PixelFormat::Mjpeg,
            PixelFormat::H264,
            PixelFormat::H265,
        ] {
            let parsed: PixelFormat = format.to_string().parse().unwrap();
            assert_eq!(parsed, format);
        }
    }

    #[test]
    fn compressed_classification() {
        assert!(PixelFormat::Mjpeg.is_compressed());
        assert!(!PixelFormat::Yuyv.is_compressed());
        assert_eq!(PixelFormat::Yuyv.class(), PixelFormatClass::Yuv);
        assert_eq!(PixelFormat::Rggb8.class(), PixelFormatClass::Rgb);
    }
}
