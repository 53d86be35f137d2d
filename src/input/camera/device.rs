//! V4L2 device node enumeration and capability queries.
//!
//! A [`DeviceNode`] is one `/dev/video*` node with capture capability. The
//! node is opened only while querying or applying a format; streaming opens
//! its own descriptor.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use v4l::format::fourcc::FourCC;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::video::Capture;
use v4l::Device;
use v4l::Fraction as V4lFraction;

use crate::error::{Error, ErrorKind, Result};
use crate::format::{Fraction, PixelFormat};
use crate::video_format::VideoFormat;

/// One kernel video device node with video-capture capability.
#[derive(Debug, Clone)]
pub(crate) struct DeviceNode {
    path: PathBuf,
    card: String,
    driver: String,
    bus_info: String,
    formats: Vec<VideoFormat>,
    fourccs: Vec<FourCC>,
}

impl DeviceNode {
    /// Open and interrogate a device node.
    ///
    /// Returns `Ok(None)` for nodes without capture capability (metadata
    /// nodes of the same hardware). The node is closed before returning.
    pub(crate) fn query(path: &Path) -> Result<Option<DeviceNode>> {
        let device = Device::with_path(path).map_err(|e| {
            Error::new(ErrorKind::CannotOpenCamera, "Cannot open camera ({0})")
                .with_arg(0, path.display().to_string())
                .with_reason(Error::from_io(&e))
        })?;

        let caps = device.query_caps().map_err(|e| {
            Error::new(
                ErrorKind::CannotQueryDeviceCapabilities,
                "Cannot query V4L2 device capabilities (QUERYCAP) ({0})",
            )
            .with_arg(0, path.display().to_string())
            .with_reason(Error::from_io(&e))
        })?;

        use v4l::capability::Flags;
        let device_caps = caps.capabilities;
        if !device_caps.contains(Flags::VIDEO_CAPTURE)
            && !device_caps.contains(Flags::VIDEO_CAPTURE_MPLANE)
        {
            debug!("Skipping non-capture node {}", path.display());
            return Ok(None);
        }

        let mut node = DeviceNode {
            path: path.to_path_buf(),
            card: caps.card.clone(),
            driver: caps.driver.clone(),
            bus_info: caps.bus.clone(),
            formats: Vec::new(),
            fourccs: Vec::new(),
        };
        node.enumerate_formats(&device)?;

        Ok(Some(node))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn card(&self) -> &str {
        &self.card
    }

    pub(crate) fn driver(&self) -> &str {
        &self.driver
    }

    pub(crate) fn bus_info(&self) -> &str {
        &self.bus_info
    }

    pub(crate) fn formats(&self) -> &[VideoFormat] {
        &self.formats
    }

    pub(crate) fn supports_fourcc(&self, fourcc: FourCC) -> bool {
        self.fourccs.contains(&fourcc)
    }

    /// Enumerate the (pixel-format, resolution, framerate) triples the node
    /// offers. Entries some hardware reports twice are deduplicated.
    fn enumerate_formats(&mut self, device: &Device) -> Result<()> {
        let descriptions = device.enum_formats().map_err(|e| {
            Error::new(
                ErrorKind::CannotQueryDeviceCapabilities,
                "Cannot query V4L2 device formats (ENUM_FMT)",
            )
            .with_reason(Error::from_io(&e))
        })?;

        for desc in descriptions {
            self.fourccs.push(desc.fourcc);

            let Some(pixel_format) = PixelFormat::from_fourcc(desc.fourcc) else {
                debug!(
                    "Skipping unsupported format {} ({}) on {}",
                    desc.fourcc,
                    desc.description,
                    self.path.display()
                );
                continue;
            };

            let sizes = self.enumerate_sizes(device, desc.fourcc)?;
            for (width, height) in sizes {
                let framerates = self.enumerate_framerates(device, desc.fourcc, width, height)?;

                if framerates.is_empty() {
                    // Some devices report no frame intervals at all.
                    self.formats.push(VideoFormat::for_camera(
                        width,
                        height,
                        pixel_format,
                        None,
                        desc.fourcc,
                        desc.description.clone(),
                    ));
                }
                for framerate in framerates {
                    self.formats.push(VideoFormat::for_camera(
                        width,
                        height,
                        pixel_format,
                        Some(framerate),
                        desc.fourcc,
                        desc.description.clone(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn enumerate_sizes(&self, device: &Device, fourcc: FourCC) -> Result<Vec<(u32, u32)>> {
        let mut sizes: Vec<(u32, u32)> = Vec::new();

        let enumerated = device.enum_framesizes(fourcc).map_err(|e| {
            Error::new(
                ErrorKind::CannotQueryDeviceCapabilities,
                "Cannot query V4L2 device frame sizes (ENUM_FRAMESIZES)",
            )
            .with_reason(Error::from_io(&e))
        })?;

        for framesize in enumerated {
            let size = match framesize.size {
                FrameSizeEnum::Discrete(d) => (d.width, d.height),
                FrameSizeEnum::Stepwise(s) => (s.max_width, s.max_height),
            };
            // Some hardware lists a size twice.
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }

        Ok(sizes)
    }

    fn enumerate_framerates(
        &self,
        device: &Device,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Vec<Fraction>> {
        let mut framerates: Vec<Fraction> = Vec::new();

        let enumerated = match device.enum_frameintervals(fourcc, width, height) {
            Ok(intervals) => intervals,
            Err(e) => {
                // Drivers without frame interval support report EINVAL here.
                debug!(
                    "No frame intervals for {} {}x{}: {}",
                    fourcc, width, height, e
                );
                return Ok(framerates);
            }
        };

        for interval in enumerated {
            // The enumerated value is a frame interval in seconds, so
            // numerator and denominator swap to become a framerate.
            let framerate = match interval.interval {
                FrameIntervalEnum::Discrete(f) => Fraction::new(f.denominator, f.numerator),
                FrameIntervalEnum::Stepwise(s) => Fraction::new(s.max.denominator, s.max.numerator),
            };
            if framerate.numerator == 0 {
                continue;
            }
            // Duplicate intervals appear on some hardware as well.
            if !framerates.iter().any(|f| *f == framerate) {
                framerates.push(framerate);
            }
        }

        Ok(framerates)
    }

    /// Open the node and apply a capture format, setting the framerate too
    /// where the driver supports it.
    pub(crate) fn apply_format(&self, format: &VideoFormat) -> Result<()> {
        let device = Device::with_path(&self.path).map_err(|e| {
            Error::new(ErrorKind::CannotOpenCamera, "Cannot open camera ({0})")
                .with_arg(0, self.path.display().to_string())
                .with_reason(Error::from_io(&e))
        })?;

        let fourcc = format
            .native_fourcc()
            .or_else(|| format.pixel_format().to_fourcc())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::CannotSetCameraFormat,
                    "Format {0} has no driver FOURCC",
                )
                .with_arg(0, format.pixel_format().to_string())
            })?;

        let requested = v4l::Format::new(format.width(), format.height(), fourcc);
        let actual = device.set_format(&requested).map_err(|e| {
            Error::new(
                ErrorKind::CannotSetCameraFormat,
                "Cannot set camera format (S_FMT)",
            )
            .with_reason(Error::from_io(&e))
        })?;

        if actual.width != format.width() || actual.height != format.height() {
            warn!(
                "Requested {}x{}, driver selected {}x{}",
                format.width(),
                format.height(),
                actual.width,
                actual.height
            );
        }

        if let Some(framerate) = format.framerate() {
            if framerate.numerator > 0 {
                let params = v4l::video::capture::Parameters::new(V4lFraction::new(
                    framerate.denominator,
                    framerate.numerator,
                ));
                if let Err(e) = device.set_params(&params) {
                    // Not all drivers support time-per-frame.
                    warn!("Cannot set framerate on {}: {}", self.path.display(), e);
                }
            }
        }

        Ok(())
    }

    /// Test-only constructor for synthetic nodes.
    #[cfg(test)]
    pub(crate) fn synthetic(
        path: &str,
        card: &str,
        bus_info: &str,
        formats: Vec<VideoFormat>,
    ) -> Self {
        let fourccs = formats.iter().filter_map(|f| f.native_fourcc()).collect();
        Self {
            path: PathBuf::from(path),
            card: card.to_string(),
            driver: "synthetic".to_string(),
            bus_info: bus_info.to_string(),
            formats,
            fourccs,
        }
    }
}
