//! Local camera input (V4L2).
//!
//! One [`CameraInput`] represents a physical camera. Several kernel device
//! nodes can belong to the same hardware (same bus-info); they are grouped
//! into one logical input whose display name is the first node's card name.

pub(crate) mod device;
mod stream;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde_json::json;
use tracing::{error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::format::{ChannelFormat, ColorChannel, PixelFormat};
use crate::frame::Frame;
use crate::input::{FrameSink, Input, MessageCallback, SourceKind};
use crate::queue::FrameRef;
use crate::video_format::{SerializationFormat, VideoFormat};

use device::DeviceNode;
use stream::CaptureStream;

struct ConfiguredCapture {
    node_index: usize,
    format: VideoFormat,
}

/// A logical camera: one or more V4L2 device nodes on the same bus.
pub struct CameraInput {
    nodes: Vec<DeviceNode>,
    configured: Option<ConfiguredCapture>,
    sink: Arc<FrameSink>,
    stop: Arc<AtomicBool>,
    eos_sent: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraInput {
    /// Build a logical camera from the nodes that share one bus. The node
    /// list must not be empty.
    pub(crate) fn from_nodes(nodes: Vec<DeviceNode>) -> Self {
        debug_assert!(!nodes.is_empty());
        Self {
            nodes,
            configured: None,
            sink: Arc::new(FrameSink::new()),
            stop: Arc::new(AtomicBool::new(false)),
            eos_sent: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn bus_info(&self) -> &str {
        self.nodes[0].bus_info()
    }

    pub fn card(&self) -> &str {
        self.nodes[0].card()
    }

    pub fn device_file(&self) -> PathBuf {
        self.nodes[0].path().to_path_buf()
    }

    pub fn driver(&self) -> &str {
        self.nodes[0].driver()
    }

    /// Score how well a serialized camera spec matches this input.
    ///
    /// 10 for an exact bus-info + card + device-file match, 5 when bus-info
    /// or card match, 1 for a card match alone, 0 otherwise.
    pub(crate) fn spec_match_score(&self, bus_info: &str, card: &str, device_file: &str) -> u32 {
        for node in &self.nodes {
            if node.bus_info() == bus_info
                && node.card() == card
                && node.path().to_string_lossy() == device_file
            {
                return 10;
            }
        }

        for node in &self.nodes {
            if node.bus_info() == bus_info || node.card() == card {
                return 5;
            }
        }

        for node in &self.nodes {
            if node.card() == card {
                return 1;
            }
        }

        0
    }
}

impl Input for CameraInput {
    fn display_name(&self) -> String {
        self.card().to_string()
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn video_formats(&self) -> Vec<VideoFormat> {
        self.nodes
            .iter()
            .flat_map(|node| node.formats().iter().cloned())
            .collect()
    }

    fn configure(&mut self, requested: Option<&VideoFormat>) -> Result<VideoFormat> {
        let requested = requested.ok_or_else(|| {
            Error::new(
                ErrorKind::Parameter,
                "A camera needs a requested capture format",
            )
        })?;

        // Find the best-scoring native format and the node that owns it.
        let mut best: Option<(usize, &VideoFormat)> = None;
        let mut best_score = 0;
        for (node_index, node) in self.nodes.iter().enumerate() {
            for format in node.formats() {
                let score = requested.match_score(format);
                if score > best_score {
                    best_score = score;
                    best = Some((node_index, format));
                }
            }
        }

        let Some((node_index, format)) = best else {
            return Err(Error::new(
                ErrorKind::CannotSetCameraFormat,
                "No device format matches {0}",
            )
            .with_arg(0, requested.to_string()));
        };

        let format = format.clone();
        self.nodes[node_index].apply_format(&format)?;

        info!(
            "Configured {} on {} as {}",
            self.card(),
            self.nodes[node_index].path().display(),
            format
        );

        self.configured = Some(ConfiguredCapture {
            node_index,
            format: format.clone(),
        });
        Ok(format)
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        self.sink.set_callback(callback);
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let configured = self.configured.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::Usage,
                "Cannot start capturing without a configured format",
            )
        })?;

        let path = self.nodes[configured.node_index].path().to_path_buf();
        let format = configured.format.clone();

        self.stop.store(false, Ordering::Release);
        self.eos_sent.store(false, Ordering::Release);

        let sink = self.sink.clone();
        let stop = self.stop.clone();
        let eos_sent = self.eos_sent.clone();

        self.worker = Some(std::thread::spawn(move || {
            capture_loop(&path, &format, &sink, &stop, &eos_sent);
        }));

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.stop.store(true, Ordering::Release);
        let _ = worker.join();

        if !self.eos_sent.swap(true, Ordering::AcqRel) {
            self.sink.end_of_stream();
        }
        self.stop.store(false, Ordering::Release);
        Ok(())
    }

    fn peek_frame(&self) -> Option<FrameRef<'_>> {
        self.sink.queue().peek()
    }

    fn pop_frame(&self) -> Option<Frame> {
        self.sink.queue().pop()
    }

    fn serialize(&self, format: SerializationFormat) -> Result<String> {
        let SerializationFormat::Json = format;
        let node = &self.nodes[0];
        serde_json::to_string(&json!({
            "class": "v4l2",
            "bus_info": node.bus_info(),
            "card": node.card(),
            "device_file": node.path().to_string_lossy(),
        }))
        .map_err(|e| {
            Error::new(ErrorKind::Internal, "Cannot serialize camera input: {0}")
                .with_arg(0, e.to_string())
        })
    }
}

impl Drop for CameraInput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Background producer: streams buffers from the device into the sink.
fn capture_loop(
    path: &std::path::Path,
    format: &VideoFormat,
    sink: &FrameSink,
    stop: &AtomicBool,
    eos_sent: &AtomicBool,
) {
    let fourcc = format
        .native_fourcc()
        .or_else(|| format.pixel_format().to_fourcc())
        .map(|f| f.repr)
        .unwrap_or(*b"YUYV");

    let mut stream = match CaptureStream::open(
        path,
        format.width(),
        format.height(),
        fourcc,
        format.framerate(),
    ) {
        Ok(stream) => stream,
        Err(e) => {
            error!(
                "Cannot start capture on {}: {}",
                path.display(),
                e.full_message()
            );
            if !eos_sent.swap(true, Ordering::AcqRel) {
                sink.end_of_stream();
            }
            return;
        }
    };

    let pixel_format = format.pixel_format();
    let mut scratch = Vec::new();

    while !stop.load(Ordering::Acquire) {
        let meta = match stream.next_into(&mut scratch) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // No frame within the poll window; re-check the stop flag.
                warn!("Capture timeout on {} - no signal?", path.display());
                continue;
            }
            Err(e) => {
                error!("Capture error on {}: {}", path.display(), e);
                break;
            }
        };

        if meta.bytes_used == 0 {
            continue;
        }

        match wrap_captured_frame(
            pixel_format,
            stream.width(),
            stream.height(),
            &scratch[..meta.bytes_used],
            meta.timestamp_us,
        ) {
            Ok(frame) => sink.push_frame(frame),
            Err(e) => {
                warn!("Dropping malformed frame: {}", e.formatted_message());
            }
        }
    }

    drop(stream);

    if !stop.load(Ordering::Acquire) {
        // The loop ended on its own (capture error): surface it as stream end.
        if !eos_sent.swap(true, Ordering::AcqRel) {
            sink.end_of_stream();
        }
    }
}

/// Wrap a dequeued kernel buffer payload into a frame.
fn wrap_captured_frame(
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    payload: &[u8],
    timestamp_us: u64,
) -> Result<Frame> {
    let mut frame = Frame::new();
    frame.set_format(pixel_format, width, height);

    match pixel_format {
        PixelFormat::Yuyv => {
            frame.add_raw_plane(ColorChannel::Interleaved, 16)?;
            frame.copy_raw_plane(ColorChannel::Interleaved, payload)?;
        }
        PixelFormat::Rggb8 => {
            frame.add_raw_plane(ColorChannel::Interleaved, 8)?;
            frame.copy_raw_plane(ColorChannel::Interleaved, payload)?;
        }
        PixelFormat::Mjpeg => {
            frame.add_compressed_plane(
                ColorChannel::Compressed,
                ChannelFormat::CompressedMjpeg,
                8,
                payload,
                width,
                height,
            )?;
        }
        PixelFormat::H264 => {
            frame.add_compressed_plane(
                ColorChannel::Compressed,
                ChannelFormat::CompressedH264,
                8,
                payload,
                width,
                height,
            )?;
        }
        PixelFormat::H265 => {
            frame.add_compressed_plane(
                ColorChannel::Compressed,
                ChannelFormat::CompressedH265,
                8,
                payload,
                width,
                height,
            )?;
        }
        other => {
            return Err(
                Error::new(ErrorKind::Internal, "Unsupported capture pixel format ({0})")
                    .with_arg(0, other.to_string()),
            );
        }
    }

    frame.set_timestamp_us(timestamp_us);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Fraction;
    use v4l::format::fourcc::FourCC;

    fn test_camera() -> CameraInput {
        let formats = vec![VideoFormat::for_camera(
            1280,
            720,
            PixelFormat::Yuyv,
            Some(Fraction::new(30, 1)),
            FourCC::new(b"YUYV"),
            "YUYV 4:2:2",
        )];
        let node0 = DeviceNode::synthetic(
            "/dev/video0",
            "ACME Webcam Pro",
            "usb-0000:00:14.0-3",
            formats,
        );
        let node1 = DeviceNode::synthetic(
            "/dev/video1",
            "ACME Webcam Pro",
            "usb-0000:00:14.0-3",
            Vec::new(),
        );
        CameraInput::from_nodes(vec![node0, node1])
    }

    #[test]
    fn display_name_is_first_node_card() {
        assert_eq!(test_camera().display_name(), "ACME Webcam Pro");
    }

    #[test]
    fn serializes_first_node_identity() {
        let camera = test_camera();
        let data = camera.serialize(SerializationFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["class"], "v4l2");
        assert_eq!(value["bus_info"], "usb-0000:00:14.0-3");
        assert_eq!(value["card"], "ACME Webcam Pro");
        assert_eq!(value["device_file"], "/dev/video0");
    }

    #[test]
    fn spec_match_scores() {
        let camera = test_camera();
        assert_eq!(
            camera.spec_match_score("usb-0000:00:14.0-3", "ACME Webcam Pro", "/dev/video0"),
            10
        );
        // Matching second node's device file through first node identity
        // still yields a full match via that node.
        assert_eq!(
            camera.spec_match_score("usb-0000:00:14.0-3", "ACME Webcam Pro", "/dev/video1"),
            10
        );
        assert_eq!(
            camera.spec_match_score("usb-0000:00:14.0-3", "Other Cam", "/dev/video9"),
            5
        );
        assert_eq!(
            camera.spec_match_score("usb-9999", "ACME Webcam Pro", "/dev/video9"),
            5
        );
        assert_eq!(camera.spec_match_score("usb-9999", "Other Cam", "/dev/video9"), 0);
    }

    #[test]
    fn merged_format_list_covers_all_nodes() {
        let camera = test_camera();
        assert_eq!(camera.video_formats().len(), 1);
    }

    #[test]
    fn wrap_yuyv_payload() {
        let payload = vec![0x80u8; 4 * 2 * 2];
        let frame = wrap_captured_frame(PixelFormat::Yuyv, 4, 2, &payload, 1_000).unwrap();
        assert_eq!(frame.timestamp_us(), 1_000);
        assert!(frame.has_plane(ColorChannel::Interleaved));
        assert!(frame.is_keyframe());
    }

    #[test]
    fn wrap_mjpeg_payload_is_compressed() {
        let payload = [0xFFu8, 0xD8, 0x00, 0xFF, 0xD9];
        let frame = wrap_captured_frame(PixelFormat::Mjpeg, 640, 480, &payload, 0).unwrap();
        let plane = frame.plane(ColorChannel::Compressed).unwrap();
        assert_eq!(plane.channel_format(), ChannelFormat::CompressedMjpeg);
        assert_eq!(plane.stride(), payload.len());
    }
}
