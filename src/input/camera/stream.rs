//! V4L2 streaming with memory-mapped buffers (ioctl layer).
//!
//! Opening a stream requests and maps the kernel capture buffers, queues
//! them all and switches streaming on. Each captured frame is copied out of
//! its mapped buffer and the buffer is immediately re-queued. Dropping the
//! stream switches streaming off and releases the buffer allocation so a
//! later format change is not refused with EBUSY.

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};
use v4l2r::bindings::{v4l2_requestbuffers, v4l2_streamparm, v4l2_streamparm__bindgen_ty_1};
use v4l2r::ioctl::{
    self, Capabilities, Capability as V4l2rCapability, MemoryConsistency, PlaneMapping, QBufPlane,
    QBuffer, QueryBuffer, V4l2Buffer,
};
use v4l2r::memory::{MemoryType, MmapHandle};
use v4l2r::{Format as V4l2rFormat, PixelFormat as V4l2rPixelFormat, QueueType};

use crate::error::{Error, ErrorKind, Result};
use crate::format::Fraction;

/// Number of kernel capture buffers to request.
const BUFFER_COUNT: u32 = 4;

/// How long to wait for the next frame before reporting a timeout.
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Metadata of one captured frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CaptureMeta {
    pub bytes_used: usize,
    pub sequence: u64,
    /// Capture timestamp from the kernel buffer, in microseconds.
    pub timestamp_us: u64,
}

fn stream_error(kind: ErrorKind, template: &str, detail: impl ToString) -> Error {
    Error::new(kind, template).with_arg(0, detail.to_string())
}

/// An active V4L2 capture stream.
pub(crate) struct CaptureStream {
    fd: File,
    queue: QueueType,
    width: u32,
    height: u32,
    stride: u32,
    mappings: Vec<Vec<PlaneMapping>>,
}

impl CaptureStream {
    /// Open the device, apply the format and start streaming.
    pub(crate) fn open(
        device_path: &Path,
        width: u32,
        height: u32,
        fourcc: [u8; 4],
        framerate: Option<Fraction>,
    ) -> Result<Self> {
        let mut fd = File::options()
            .read(true)
            .write(true)
            .open(device_path)
            .map_err(|e| {
                stream_error(
                    ErrorKind::CannotOpenCamera,
                    "Cannot open camera device {0}",
                    device_path.display(),
                )
                .with_reason(Error::from_io(&e))
            })?;

        let caps: V4l2rCapability = ioctl::querycap(&fd).map_err(|e| {
            stream_error(
                ErrorKind::CannotQueryDeviceCapabilities,
                "Cannot query device capabilities ({0})",
                device_path.display(),
            )
            .with_reason(Error::new(ErrorKind::Os, e.to_string()))
        })?;

        let caps_flags = caps.device_caps();
        let queue = if caps_flags.contains(Capabilities::VIDEO_CAPTURE_MPLANE) {
            QueueType::VideoCaptureMplane
        } else if caps_flags.contains(Capabilities::VIDEO_CAPTURE) {
            QueueType::VideoCapture
        } else {
            return Err(Error::new(
                ErrorKind::CannotQueryDeviceCapabilities,
                "Device {0} does not support capture queues",
            )
            .with_arg(0, device_path.display().to_string()));
        };

        let mut fmt: V4l2rFormat = ioctl::g_fmt(&fd, queue).map_err(|e| {
            stream_error(
                ErrorKind::CannotSetCameraFormat,
                "Cannot read device format: {0}",
                e,
            )
        })?;

        fmt.width = width;
        fmt.height = height;
        fmt.pixelformat = V4l2rPixelFormat::from(u32::from_le_bytes(fourcc));

        let actual: V4l2rFormat = ioctl::s_fmt(&mut fd, (queue, &fmt)).map_err(|e| {
            stream_error(
                ErrorKind::CannotSetCameraFormat,
                "Cannot set camera format (S_FMT): {0}",
                e,
            )
        })?;

        if actual.width != width || actual.height != height {
            warn!(
                "Requested {}x{}, driver selected {}x{}",
                width, height, actual.width, actual.height
            );
        }

        let stride = actual
            .plane_fmt
            .first()
            .map(|p| p.bytesperline)
            .unwrap_or(actual.width);

        if let Some(framerate) = framerate {
            if framerate.numerator > 0 {
                if let Err(e) = set_frame_interval(&fd, queue, framerate) {
                    warn!("Cannot set camera framerate: {}", e.formatted_message());
                }
            }
        }

        let req: v4l2_requestbuffers = ioctl::reqbufs(
            &fd,
            queue,
            MemoryType::Mmap,
            BUFFER_COUNT,
            MemoryConsistency::empty(),
        )
        .map_err(|e| {
            stream_error(
                ErrorKind::CannotAllocCapturingBuffers,
                "Cannot request capture buffers (REQBUFS): {0}",
                e,
            )
        })?;

        let allocated = req.count as usize;
        if allocated < 2 {
            return Err(Error::new(
                ErrorKind::CannotAllocCapturingBuffers,
                "Driver granted only {0} capture buffers",
            )
            .with_arg(0, allocated.to_string()));
        }

        let mut mappings = Vec::with_capacity(allocated);
        for index in 0..allocated {
            let query: QueryBuffer = ioctl::querybuf(&fd, queue, index).map_err(|e| {
                stream_error(
                    ErrorKind::CannotAllocCapturingBuffers,
                    "Cannot query capture buffer (QUERYBUF): {0}",
                    e,
                )
            })?;

            if query.planes.is_empty() {
                return Err(Error::new(
                    ErrorKind::CannotAllocCapturingBuffers,
                    "Driver returned zero planes for buffer {0}",
                )
                .with_arg(0, index.to_string()));
            }

            let mut plane_maps = Vec::with_capacity(query.planes.len());
            for plane in &query.planes {
                let mapping = ioctl::mmap(&fd, plane.mem_offset, plane.length).map_err(|e| {
                    stream_error(
                        ErrorKind::CannotAllocCapturingBuffers,
                        "Cannot map capture buffer memory (mmap): {0}",
                        e,
                    )
                })?;
                plane_maps.push(mapping);
            }
            mappings.push(plane_maps);
        }

        let mut stream = Self {
            fd,
            queue,
            width: actual.width,
            height: actual.height,
            stride,
            mappings,
        };

        for index in 0..stream.mappings.len() as u32 {
            stream.queue_buffer(index)?;
        }

        ioctl::streamon(&stream.fd, stream.queue).map_err(|e| {
            stream_error(
                ErrorKind::CannotStartCapturing,
                "Cannot start capturing (STREAMON): {0}",
                e,
            )
        })?;

        debug!(
            "Capture stream on {} at {}x{} stride={}",
            device_path.display(),
            stream.width,
            stream.height,
            stream.stride
        );

        Ok(stream)
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    /// Wait for the next captured frame and copy its payload into `dst`.
    ///
    /// `ErrorKind::TimedOut` io errors indicate no frame within the poll
    /// window; the caller decides whether to retry.
    pub(crate) fn next_into(&mut self, dst: &mut Vec<u8>) -> io::Result<CaptureMeta> {
        self.wait_ready()?;

        let dqbuf: V4l2Buffer = ioctl::dqbuf(&self.fd, self.queue)
            .map_err(|e| io::Error::other(format!("DQBUF failed: {}", e)))?;
        let vbuf = dqbuf.as_v4l2_buffer();
        let index = vbuf.index as usize;
        let sequence = vbuf.sequence as u64;
        let timestamp_us =
            vbuf.timestamp.tv_sec as u64 * 1_000_000 + vbuf.timestamp.tv_usec as u64;

        let mut total = 0usize;
        for (plane_idx, plane) in dqbuf.planes_iter().enumerate() {
            let bytes_used = *plane.bytesused as usize;
            let data_offset = plane.data_offset.copied().unwrap_or(0) as usize;
            if bytes_used == 0 {
                continue;
            }
            let mapping = &self.mappings[index][plane_idx];
            let start = data_offset.min(mapping.len());
            let end = (data_offset + bytes_used).min(mapping.len());
            total += end.saturating_sub(start);
        }

        dst.resize(total, 0);
        let mut cursor = 0usize;
        for (plane_idx, plane) in dqbuf.planes_iter().enumerate() {
            let bytes_used = *plane.bytesused as usize;
            let data_offset = plane.data_offset.copied().unwrap_or(0) as usize;
            if bytes_used == 0 {
                continue;
            }
            let mapping = &self.mappings[index][plane_idx];
            let start = data_offset.min(mapping.len());
            let end = (data_offset + bytes_used).min(mapping.len());
            let len = end.saturating_sub(start);
            if len == 0 {
                continue;
            }
            dst[cursor..cursor + len].copy_from_slice(&mapping[start..end]);
            cursor += len;
        }

        self.queue_buffer(index as u32)
            .map_err(|e| io::Error::other(e.formatted_message()))?;

        Ok(CaptureMeta {
            bytes_used: total,
            sequence,
            timestamp_us,
        })
    }

    fn wait_ready(&self) -> io::Result<()> {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let timeout_ms = FRAME_TIMEOUT.as_millis().min(u16::MAX as u128) as u16;
        let ready = poll(&mut fds, PollTimeout::from(timeout_ms))?;
        if ready == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "capture timeout"));
        }
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let handle = MmapHandle::default();
        let planes = self.mappings[index as usize]
            .iter()
            .map(|mapping| {
                let mut plane = QBufPlane::new_from_handle(&handle, 0);
                plane.0.length = mapping.len() as u32;
                plane
            })
            .collect();
        let mut qbuf: QBuffer<MmapHandle> = QBuffer::new(self.queue, index);
        qbuf.planes = planes;
        ioctl::qbuf::<_, ()>(&self.fd, qbuf).map_err(|e| {
            stream_error(
                ErrorKind::ErrorWhileCapturing,
                "Cannot queue capture buffer (QBUF): {0}",
                e,
            )
        })
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Err(e) = ioctl::streamoff(&self.fd, self.queue) {
            debug!("STREAMOFF failed: {}", e);
        }

        // Unmap before releasing the buffer allocation.
        self.mappings.clear();

        // Release the driver-side buffers; without this a later S_FMT on the
        // same node is refused with EBUSY.
        let released: std::result::Result<v4l2_requestbuffers, _> = ioctl::reqbufs(
            &self.fd,
            self.queue,
            MemoryType::Mmap,
            0,
            MemoryConsistency::empty(),
        );
        if let Err(e) = released {
            debug!("Cannot release capture buffers: {}", e);
        }
    }
}

fn set_frame_interval(fd: &File, queue: QueueType, framerate: Fraction) -> Result<()> {
    let mut params = unsafe { std::mem::zeroed::<v4l2_streamparm>() };
    params.type_ = queue as u32;
    params.parm = v4l2_streamparm__bindgen_ty_1 {
        capture: v4l2r::bindings::v4l2_captureparm {
            // timeperframe is the frame interval, so the fraction inverts.
            timeperframe: v4l2r::bindings::v4l2_fract {
                numerator: framerate.denominator,
                denominator: framerate.numerator,
            },
            ..unsafe { std::mem::zeroed() }
        },
    };

    let _actual: v4l2_streamparm = ioctl::s_parm(fd, params).map_err(|e| {
        stream_error(
            ErrorKind::CannotSetCameraFormat,
            "Cannot set frame interval (S_PARM): {0}",
            e,
        )
    })?;
    Ok(())
}
