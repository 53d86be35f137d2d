//! Camera enumeration and re-discovery of serialized inputs.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{Error, ErrorKind, Result};
use crate::input::camera::device::DeviceNode;
use crate::input::camera::CameraInput;
use crate::input::file::FileInput;
use crate::input::rtsp::RtspInput;
use crate::video_format::SerializationFormat;

/// Optional restriction on which cameras to list.
#[derive(Debug, Clone, Default)]
pub struct CameraFilter {
    /// Keep only cameras whose card name contains this substring.
    pub card_contains: Option<String>,
}

impl CameraFilter {
    fn accepts(&self, card: &str) -> bool {
        match &self.card_contains {
            Some(needle) => card.contains(needle.as_str()),
            None => true,
        }
    }
}

/// Enumerate local cameras.
///
/// Kernel nodes that share a bus-info string belong to the same physical
/// camera and are grouped into one logical input; the first node's card
/// name becomes the display name.
pub fn list_cameras(filter: Option<&CameraFilter>) -> Result<Vec<CameraInput>> {
    let mut node_paths: Vec<PathBuf> = Vec::new();

    let entries = std::fs::read_dir("/dev").map_err(|e| {
        Error::new(ErrorKind::Os, "Cannot read /dev: {0}").with_arg(0, e.to_string())
    })?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("video") {
            node_paths.push(entry.path());
        }
    }
    sort_video_nodes(&mut node_paths);

    let mut cameras: Vec<CameraInput> = Vec::new();
    let mut groups: Vec<(String, Vec<DeviceNode>)> = Vec::new();

    for path in &node_paths {
        let node = match DeviceNode::query(path) {
            Ok(Some(node)) => node,
            Ok(None) => continue,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e.full_message());
                continue;
            }
        };

        match groups.iter_mut().find(|(bus, _)| bus == node.bus_info()) {
            Some((_, nodes)) => nodes.push(node),
            None => groups.push((node.bus_info().to_string(), vec![node])),
        }
    }

    for (_, nodes) in groups {
        let camera = CameraInput::from_nodes(nodes);
        if filter.map(|f| f.accepts(camera.card())).unwrap_or(true) {
            cameras.push(camera);
        }
    }

    info!("Found {} camera(s)", cameras.len());
    Ok(cameras)
}

/// An input re-discovered from its serialized form.
pub enum FoundInput<'a> {
    /// An existing camera from the supplied list.
    Camera(&'a CameraInput),
    /// A freshly constructed file input (files need not be in any list).
    File(FileInput),
    /// A freshly constructed RTSP input.
    Rtsp(RtspInput),
}

/// Find the input a serialized spec refers to.
///
/// The `"class"` field selects the strategy: `"v4l2"` specs are matched
/// against `cameras` by identity scoring and the best non-zero scorer wins;
/// `"file"` and `"rtsp"` specs construct a fresh input.
pub fn find_matching_input<'a>(
    cameras: &'a [CameraInput],
    serialized: &str,
    format: SerializationFormat,
) -> Result<Option<FoundInput<'a>>> {
    let SerializationFormat::Json = format;

    let value: serde_json::Value = serde_json::from_str(serialized).map_err(|e| {
        Error::new(ErrorKind::Parameter, "Invalid input serialization: {0}")
            .with_arg(0, e.to_string())
    })?;

    let class = value["class"].as_str().ok_or_else(|| {
        Error::new(ErrorKind::Parameter, "Input serialization is missing the class field")
    })?;

    match class {
        "v4l2" => {
            let bus_info = value["bus_info"].as_str().unwrap_or("");
            let card = value["card"].as_str().unwrap_or("");
            let device_file = value["device_file"].as_str().unwrap_or("");

            let mut best: Option<&CameraInput> = None;
            let mut best_score = 0;
            for camera in cameras {
                let score = camera.spec_match_score(bus_info, card, device_file);
                if score > best_score {
                    best_score = score;
                    best = Some(camera);
                }
            }
            Ok(best.map(FoundInput::Camera))
        }
        "file" => {
            let path = value["path"].as_str().ok_or_else(|| {
                Error::new(ErrorKind::Parameter, "File spec is missing the path field")
            })?;
            Ok(Some(FoundInput::File(FileInput::new(path))))
        }
        "rtsp" => {
            let url = value["url"].as_str().ok_or_else(|| {
                Error::new(ErrorKind::Parameter, "RTSP spec is missing the url field")
            })?;
            Ok(Some(FoundInput::Rtsp(RtspInput::new(url))))
        }
        other => {
            Err(Error::new(ErrorKind::Parameter, "Unknown input class: {0}").with_arg(0, other))
        }
    }
}

/// Order `/dev/videoN` nodes by their numeric suffix, so the grouping and
/// display names are stable across runs.
fn sort_video_nodes(paths: &mut [PathBuf]) {
    fn node_number(path: &std::path::Path) -> u32 {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(u32::MAX)
    }
    paths.sort_by_key(|p| node_number(p));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Fraction, PixelFormat};
    use crate::input::Input;
    use crate::video_format::VideoFormat;
    use v4l::format::fourcc::FourCC;

    fn camera(card: &str, bus: &str, device: &str) -> CameraInput {
        let formats = vec![VideoFormat::for_camera(
            640,
            480,
            PixelFormat::Yuyv,
            Some(Fraction::new(30, 1)),
            FourCC::new(b"YUYV"),
            "YUYV 4:2:2",
        )];
        CameraInput::from_nodes(vec![DeviceNode::synthetic(device, card, bus, formats)])
    }

    #[test]
    fn matches_serialized_camera_exactly() {
        let cameras = vec![
            camera("Cam A", "usb-0000:00:14.0-1", "/dev/video0"),
            camera("Cam B", "usb-0000:00:14.0-2", "/dev/video2"),
        ];

        let spec = cameras[1].serialize(SerializationFormat::Json).unwrap();
        let found = find_matching_input(&cameras, &spec, SerializationFormat::Json)
            .unwrap()
            .expect("camera should be found");

        match found {
            FoundInput::Camera(found) => {
                assert!(std::ptr::eq(found, &cameras[1]));
                assert_eq!(
                    found.spec_match_score("usb-0000:00:14.0-2", "Cam B", "/dev/video2"),
                    10
                );
            }
            _ => panic!("expected a camera"),
        }
    }

    #[test]
    fn unmatched_camera_spec_finds_nothing() {
        let cameras = vec![camera("Cam A", "usb-1", "/dev/video0")];
        let spec = r#"{"class":"v4l2","bus_info":"usb-9","card":"Gone","device_file":"/dev/video7"}"#;
        let found = find_matching_input(&cameras, spec, SerializationFormat::Json).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn file_spec_constructs_a_fresh_input() {
        let found = find_matching_input(
            &[],
            r#"{"class":"file","path":"/media/clip.mp4"}"#,
            SerializationFormat::Json,
        )
        .unwrap()
        .expect("file inputs are always constructible");

        match found {
            FoundInput::File(input) => assert_eq!(input.display_name(), "clip.mp4"),
            _ => panic!("expected a file input"),
        }
    }

    #[test]
    fn rtsp_spec_constructs_a_fresh_input() {
        let found = find_matching_input(
            &[],
            r#"{"class":"rtsp","url":"rtsp://cam.local/live"}"#,
            SerializationFormat::Json,
        )
        .unwrap()
        .expect("rtsp inputs are always constructible");

        match found {
            FoundInput::Rtsp(input) => assert_eq!(input.url(), "rtsp://cam.local/live"),
            _ => panic!("expected an rtsp input"),
        }
    }

    #[test]
    fn unknown_class_is_rejected() {
        let err = find_matching_input(&[], r#"{"class":"weird"}"#, SerializationFormat::Json)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }

    #[test]
    fn video_nodes_sort_numerically() {
        let mut paths = vec![
            PathBuf::from("/dev/video10"),
            PathBuf::from("/dev/video2"),
            PathBuf::from("/dev/video0"),
        ];
        sort_video_nodes(&mut paths);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/dev/video0"),
                PathBuf::from("/dev/video2"),
                PathBuf::from("/dev/video10"),
            ]
        );
    }

    #[test]
    fn filter_restricts_by_card_name() {
        let filter = CameraFilter {
            card_contains: Some("Webcam".to_string()),
        };
        assert!(filter.accepts("ACME Webcam Pro"));
        assert!(!filter.accepts("HDMI Grabber"));
        assert!(CameraFilter::default().accepts("anything"));
    }
}
