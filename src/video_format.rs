//! Video format descriptors and format matching.
//!
//! A [`VideoFormat`] describes one attainable (pixel-format, resolution,
//! framerate) configuration of an input. Camera formats additionally carry
//! the driver-native FOURCC and description string, which is why the
//! descriptor is tagged by source family.

use serde_json::json;
use v4l::format::fourcc::FourCC;

use crate::error::{Error, ErrorKind, Result};
use crate::format::{Fraction, PixelFormat, PixelFormatClass};

/// String serialization formats understood by [`VideoFormat::serialize`]
/// and the input serializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationFormat {
    Json,
}

/// Source-family specific native metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatDetails {
    /// Camera-native format: driver FOURCC and user-visible description.
    Camera { fourcc: FourCC, description: String },
    /// Format learned from an RTSP stream on connect.
    Rtsp,
    /// Format learned from a container file on open.
    File,
}

/// Descriptor of one attainable video configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    /// `None` means the framerate is variable or unknown.
    framerate: Option<Fraction>,
    details: FormatDetails,
}

/// Coarse quality of a format match, derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBand {
    None,
    Approximate,
    Exact,
}

impl VideoFormat {
    pub fn for_camera(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        framerate: Option<Fraction>,
        fourcc: FourCC,
        description: impl Into<String>,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            framerate,
            details: FormatDetails::Camera {
                fourcc,
                description: description.into(),
            },
        }
    }

    pub fn for_rtsp(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        framerate: Option<Fraction>,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            framerate,
            details: FormatDetails::Rtsp,
        }
    }

    pub fn for_file(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        framerate: Option<Fraction>,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            framerate,
            details: FormatDetails::File,
        }
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

    pub fn pixel_format_class(&self) -> PixelFormatClass {
        self.pixel_format.class()
    }

    pub fn has_fixed_framerate(&self) -> bool {
        self.framerate.is_some()
    }

    pub fn framerate(&self) -> Option<Fraction> {
        self.framerate
    }

    pub fn details(&self) -> &FormatDetails {
        &self.details
    }

    /// Driver FOURCC for camera-native formats.
    pub fn native_fourcc(&self) -> Option<FourCC> {
        match &self.details {
            FormatDetails::Camera { fourcc, .. } => Some(*fourcc),
            _ => None,
        }
    }

    /// Human-readable description of this format.
    pub fn user_description(&self) -> String {
        match &self.details {
            FormatDetails::Camera { description, .. } => description.clone(),
            FormatDetails::Rtsp | FormatDetails::File => self.pixel_format.to_string(),
        }
    }

    /// Score how well `other` satisfies a request for `self`.
    ///
    /// Width or height mismatch scores 0. Matching dimensions with a
    /// pixel-format or framerate mismatch score 50, a full match scores 100.
    pub fn match_score(&self, other: &VideoFormat) -> u32 {
        if self.width != other.width || self.height != other.height {
            return 0;
        }

        if self.pixel_format != other.pixel_format {
            return 50;
        }

        let framerate_matches = match (self.framerate, other.framerate) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !framerate_matches {
            return 50;
        }

        100
    }

    /// Serialize this format to a string.
    pub fn serialize(&self, format: SerializationFormat) -> Result<String> {
        let SerializationFormat::Json = format;

        let mut obj = json!({
            "class": self.class_name(),
            "width": self.width,
            "height": self.height,
            "pixel_format": self.pixel_format.to_string(),
        });

        if let Some(framerate) = self.framerate {
            obj["framerate_num"] = json!(framerate.numerator);
            obj["framerate_den"] = json!(framerate.denominator);
        }

        if let FormatDetails::Camera {
            fourcc,
            description,
        } = &self.details
        {
            obj["fourcc"] = json!(fourcc.to_string());
            obj["description"] = json!(description);
        }

        serde_json::to_string(&obj)
            .map_err(|e| Error::new(ErrorKind::Internal, "Cannot serialize format: {0}")
                .with_arg(0, e.to_string()))
    }

    /// Reconstruct a format from its serialized form, discriminated by the
    /// `"class"` field.
    pub fn deserialize(data: &str, format: SerializationFormat) -> Result<VideoFormat> {
        let SerializationFormat::Json = format;

        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            Error::new(ErrorKind::Parameter, "Invalid format serialization: {0}")
                .with_arg(0, e.to_string())
        })?;

        let class = value["class"].as_str().ok_or_else(|| {
            Error::new(ErrorKind::Parameter, "Format serialization is missing the class field")
        })?;

        let width = value["width"].as_u64().unwrap_or(0) as u32;
        let height = value["height"].as_u64().unwrap_or(0) as u32;
        let pixel_format = value["pixel_format"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(PixelFormat::Undefined);

        let framerate = match (
            value["framerate_num"].as_u64(),
            value["framerate_den"].as_u64(),
        ) {
            (Some(num), Some(den)) if den > 0 => Some(Fraction::new(num as u32, den as u32)),
            _ => None,
        };

        match class {
            "v4l2" => {
                let fourcc_str = value["fourcc"].as_str().unwrap_or("");
                let mut repr = [b' '; 4];
                for (dst, src) in repr.iter_mut().zip(fourcc_str.bytes()) {
                    *dst = src;
                }
                let description = value["description"].as_str().unwrap_or("").to_string();
                Ok(VideoFormat::for_camera(
                    width,
                    height,
                    pixel_format,
                    framerate,
                    FourCC::new(&repr),
                    description,
                ))
            }
            "rtsp" => Ok(VideoFormat::for_rtsp(width, height, pixel_format, framerate)),
            "file" => Ok(VideoFormat::for_file(width, height, pixel_format, framerate)),
            other => Err(
                Error::new(ErrorKind::Parameter, "Unknown format class: {0}").with_arg(0, other)
            ),
        }
    }

    fn class_name(&self) -> &'static str {
        match self.details {
            FormatDetails::Camera { .. } => "v4l2",
            FormatDetails::Rtsp => "rtsp",
            FormatDetails::File => "file",
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.pixel_format)?;
        if let Some(framerate) = self.framerate {
            write!(f, " @{}fps", framerate)?;
        }
        Ok(())
    }
}

/// Find the format in `formats` that best matches `requested`.
///
/// Ties are broken by list order (the first best scorer wins). The returned
/// band classifies the winning score: 0 is `None`, 100 is `Exact`, anything
/// in between `Approximate`.
pub fn find_best_match<'a>(
    formats: &'a [VideoFormat],
    requested: &VideoFormat,
) -> (Option<&'a VideoFormat>, MatchBand) {
    let mut best: Option<&VideoFormat> = None;
    let mut best_score = 0;

    for format in formats {
        let score = requested.match_score(format);
        if score > best_score {
            best_score = score;
            best = Some(format);
        }
    }

    let band = match best_score {
        0 => MatchBand::None,
        100 => MatchBand::Exact,
        _ => MatchBand::Approximate,
    };

    (best, band)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuyv_30(width: u32, height: u32) -> VideoFormat {
        VideoFormat::for_camera(
            width,
            height,
            PixelFormat::Yuyv,
            Some(Fraction::new(30, 1)),
            FourCC::new(b"YUYV"),
            "YUYV 4:2:2",
        )
    }

    #[test]
    fn self_match_is_exact() {
        let format = yuyv_30(1280, 720);
        assert_eq!(format.match_score(&format), 100);
    }

    #[test]
    fn dimension_mismatch_scores_zero() {
        assert_eq!(yuyv_30(1280, 720).match_score(&yuyv_30(640, 480)), 0);
    }

    #[test]
    fn pixel_format_mismatch_scores_fifty() {
        let a = yuyv_30(1280, 720);
        let b = VideoFormat::for_camera(
            1280,
            720,
            PixelFormat::Mjpeg,
            Some(Fraction::new(30, 1)),
            FourCC::new(b"MJPG"),
            "Motion-JPEG",
        );
        assert_eq!(a.match_score(&b), 50);
        assert_eq!(b.match_score(&a), 50);
    }

    #[test]
    fn framerate_compares_as_fraction() {
        let a = VideoFormat::for_file(640, 480, PixelFormat::Yuv420, Some(Fraction::new(25, 1)));
        let b = VideoFormat::for_file(640, 480, PixelFormat::Yuv420, Some(Fraction::new(50, 2)));
        assert_eq!(a.match_score(&b), 100);

        let c = VideoFormat::for_file(640, 480, PixelFormat::Yuv420, None);
        assert_eq!(a.match_score(&c), 50);
    }

    #[test]
    fn best_match_prefers_first_on_ties() {
        let formats = vec![yuyv_30(640, 480), yuyv_30(1280, 720), yuyv_30(1280, 720)];
        let requested = yuyv_30(1280, 720);
        let (best, band) = find_best_match(&formats, &requested);
        assert!(std::ptr::eq(best.unwrap(), &formats[1]));
        assert_eq!(band, MatchBand::Exact);
    }

    #[test]
    fn best_match_reports_bands() {
        let formats = vec![yuyv_30(640, 480)];

        let (_, band) = find_best_match(&formats, &yuyv_30(1920, 1080));
        assert_eq!(band, MatchBand::None);

        let near = VideoFormat::for_camera(
            640,
            480,
            PixelFormat::Mjpeg,
            Some(Fraction::new(30, 1)),
            FourCC::new(b"MJPG"),
            "Motion-JPEG",
        );
        let (_, band) = find_best_match(&formats, &near);
        assert_eq!(band, MatchBand::Approximate);
    }

    #[test]
    fn serialization_round_trip() {
        for format in [
            yuyv_30(1920, 1080),
            VideoFormat::for_rtsp(1280, 720, PixelFormat::H264, Some(Fraction::new(30, 1))),
            VideoFormat::for_file(640, 360, PixelFormat::Yuv420, None),
        ] {
            let data = format.serialize(SerializationFormat::Json).unwrap();
            let back = VideoFormat::deserialize(&data, SerializationFormat::Json).unwrap();
            assert_eq!(
                back.serialize(SerializationFormat::Json).unwrap(),
                data,
                "round trip changed {data}"
            );
        }
    }
}
