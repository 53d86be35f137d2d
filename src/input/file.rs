//! Pre-recorded file input.
//!
//! The reader delivers H.264, H.265 and MJPEG streams as compressed frames
//! without re-encoding; containers that use length-prefix framing are
//! repackaged to start-code framing first. Every other codec is decoded to
//! planar YUV 4:2:0. Frames are paced to wall clock using their
//! presentation timestamps.

use std::collections::VecDeque;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg::Rescale;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info, warn};

use crate::convert::ensure_ffmpeg_initialized;
use crate::error::{Error, ErrorKind, Result};
use crate::format::{ColorChannel, Fraction, PixelFormat};
use crate::frame::Frame;
use crate::input::pacer::FramePacer;
use crate::input::rtsp::{channel_format_for, stream_dimensions, stream_framerate};
use crate::input::{FrameSink, Input, MessageCallback, SourceKind};
use crate::queue::FrameRef;
use crate::video_format::{SerializationFormat, VideoFormat};

/// What `stop()` does to the producer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileStopMode {
    /// Join the producer and keep the file open; a later `start()` resumes
    /// from the current position.
    #[default]
    Pause,
    /// Leave the producer running; the consumer simply stops reading and
    /// overflowing frames are dropped.
    ContinueWithDrop,
}

const US: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

fn provider_error(kind: ErrorKind, template: &str, e: impl ToString) -> Error {
    Error::new(kind, template).with_arg(0, e.to_string())
}

// --- bitstream filter -----------------------------------------------------

/// Length-prefix to start-code repackaging (`h264_mp4toannexb` /
/// `hevc_mp4toannexb`). The decoder provider has no safe wrapper for
/// bitstream filters, so this drives the raw API directly.
struct BitstreamFilter {
    ctx: *mut ffmpeg::sys::AVBSFContext,
}

unsafe impl Send for BitstreamFilter {}

impl BitstreamFilter {
    fn new(
        name: &str,
        params: &ffmpeg::codec::Parameters,
        time_base: ffmpeg::Rational,
    ) -> Result<Self> {
        let cname = CString::new(name).expect("filter names contain no NUL");

        unsafe {
            let filter = ffmpeg::sys::av_bsf_get_by_name(cname.as_ptr());
            if filter.is_null() {
                return Err(
                    Error::new(ErrorKind::Internal, "Bitstream filter {0} is not available")
                        .with_arg(0, name),
                );
            }

            let mut ctx: *mut ffmpeg::sys::AVBSFContext = std::ptr::null_mut();
            let ret = ffmpeg::sys::av_bsf_alloc(filter, &mut ctx);
            if ret < 0 {
                return Err(provider_error(
                    ErrorKind::Internal,
                    "Cannot allocate bitstream filter: {0}",
                    ffmpeg::Error::from(ret),
                ));
            }

            let ret = ffmpeg::sys::avcodec_parameters_copy((*ctx).par_in, params.as_ptr());
            if ret < 0 {
                ffmpeg::sys::av_bsf_free(&mut ctx);
                return Err(provider_error(
                    ErrorKind::Internal,
                    "Cannot copy codec parameters: {0}",
                    ffmpeg::Error::from(ret),
                ));
            }
            (*ctx).time_base_in = time_base.into();

            let ret = ffmpeg::sys::av_bsf_init(ctx);
            if ret < 0 {
                ffmpeg::sys::av_bsf_free(&mut ctx);
                return Err(provider_error(
                    ErrorKind::Internal,
                    "Cannot initialize bitstream filter: {0}",
                    ffmpeg::Error::from(ret),
                ));
            }

            Ok(Self { ctx })
        }
    }

    /// Run a packet through the filter in place. Returns `false` when the
    /// filter buffered the packet and has nothing to emit yet.
    fn filter(&mut self, packet: &mut ffmpeg::Packet) -> Result<bool> {
        unsafe {
            let ret = ffmpeg::sys::av_bsf_send_packet(self.ctx, packet.as_mut_ptr());
            if ret < 0 {
                return Err(provider_error(
                    ErrorKind::FileReadError,
                    "Bitstream filter rejected packet: {0}",
                    ffmpeg::Error::from(ret),
                ));
            }

            let ret = ffmpeg::sys::av_bsf_receive_packet(self.ctx, packet.as_mut_ptr());
            if ret < 0 {
                return match ffmpeg::Error::from(ret) {
                    ffmpeg::Error::Eof
                    | ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN } => Ok(false),
                    e => Err(provider_error(
                        ErrorKind::FileReadError,
                        "Bitstream filter failed: {0}",
                        e,
                    )),
                };
            }
            Ok(true)
        }
    }

    /// Codec setup data in start-code framing, from the filter output
    /// parameters.
    fn extradata(&self) -> Option<Bytes> {
        unsafe {
            let par = (*self.ctx).par_out;
            extradata_of(par)
        }
    }
}

impl Drop for BitstreamFilter {
    fn drop(&mut self) {
        unsafe {
            ffmpeg::sys::av_bsf_free(&mut self.ctx);
        }
    }
}

unsafe fn extradata_of(par: *const ffmpeg::sys::AVCodecParameters) -> Option<Bytes> {
    if par.is_null() || (*par).extradata.is_null() || (*par).extradata_size <= 0 {
        return None;
    }
    let slice = std::slice::from_raw_parts((*par).extradata, (*par).extradata_size as usize);
    Some(Bytes::copy_from_slice(slice))
}

// --- file reader ----------------------------------------------------------

fn is_passthrough_codec(id: ffmpeg::codec::Id) -> bool {
    matches!(
        id,
        ffmpeg::codec::Id::H264 | ffmpeg::codec::Id::HEVC | ffmpeg::codec::Id::MJPEG
    )
}

fn codec_id_to_pixel_format(id: ffmpeg::codec::Id) -> PixelFormat {
    match id {
        ffmpeg::codec::Id::H264 => PixelFormat::H264,
        ffmpeg::codec::Id::HEVC => PixelFormat::H265,
        ffmpeg::codec::Id::MJPEG => PixelFormat::Mjpeg,
        // Everything else is decoded to planar YUV 4:2:0.
        _ => PixelFormat::Yuv420,
    }
}

/// Demuxer plus the per-codec delivery state for one open file.
pub(crate) struct FileReader {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    framerate: Fraction,
    pixel_format: PixelFormat,
    passthrough: bool,
    bsf: Option<BitstreamFilter>,
    decoder: Option<ffmpeg::decoder::Video>,
    scaler: Option<ffmpeg::software::scaling::Context>,
    scaler_src: Option<(ffmpeg::util::format::Pixel, u32, u32)>,
    extradata: Option<Bytes>,
    /// Decoded frames not yet handed out (a single packet can yield several).
    pending: VecDeque<Frame>,
}

// Exclusive access is guaranteed by the mutex in FileInput; the ffmpeg
// contexts themselves are never shared between threads concurrently.
unsafe impl Send for FileReader {}

impl FileReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ensure_ffmpeg_initialized();

        if !path.exists() {
            return Err(
                Error::new(ErrorKind::FileNotFound, "File not found: {0}")
                    .with_arg(0, path.display().to_string()),
            );
        }

        let input = ffmpeg::format::input(&path).map_err(|e| {
            Error::new(ErrorKind::FileReadError, "Failed to open file: {0}")
                .with_arg(0, path.display().to_string())
                .with_reason(Error::new(ErrorKind::Os, e.to_string()))
        })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| {
                Error::new(ErrorKind::FileNoVideoStream, "No video stream found in file")
            })?;

        let stream_index = stream.index();
        let time_base = stream.time_base();
        let (width, height) = stream_dimensions(&stream);
        let framerate = stream_framerate(&stream).unwrap_or(Fraction::new(25, 1));

        let codec_id = stream.parameters().id();
        let passthrough = is_passthrough_codec(codec_id);
        let pixel_format = codec_id_to_pixel_format(codec_id);

        let mut bsf = None;
        let mut decoder = None;
        let mut extradata = None;

        if passthrough {
            if codec_id != ffmpeg::codec::Id::MJPEG {
                // Containers such as MP4 carry length-prefixed NAL units;
                // convert to start-code framing for downstream decoders.
                let name = if codec_id == ffmpeg::codec::Id::H264 {
                    "h264_mp4toannexb"
                } else {
                    "hevc_mp4toannexb"
                };
                match BitstreamFilter::new(name, &stream.parameters(), time_base) {
                    Ok(filter) => {
                        extradata = filter.extradata();
                        bsf = Some(filter);
                    }
                    Err(e) => {
                        warn!("{}; delivering packets unfiltered", e.formatted_message());
                    }
                }
            }
            if extradata.is_none() {
                extradata = unsafe { extradata_of(stream.parameters().as_ptr()) };
            }
        } else {
            let context =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                    .map_err(|e| {
                        provider_error(
                            ErrorKind::FileUnsupportedCodec,
                            "Cannot load decoder parameters: {0}",
                            e,
                        )
                    })?;
            decoder = Some(context.decoder().video().map_err(|e| {
                provider_error(
                    ErrorKind::FileUnsupportedCodec,
                    "Failed to open codec: {0}",
                    e,
                )
            })?);
        }

        Ok(Self {
            input,
            stream_index,
            time_base,
            width,
            height,
            framerate,
            pixel_format,
            passthrough,
            bsf,
            decoder,
            scaler: None,
            scaler_src: None,
            extradata,
            pending: VecDeque::new(),
        })
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn framerate(&self) -> Fraction {
        self.framerate
    }

    pub(crate) fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Read until the next deliverable frame. `Ok(None)` means end of file
    /// (with the decoder drained).
    pub(crate) fn read_next_frame(&mut self, stop: &AtomicBool) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let mut packet = ffmpeg::Packet::empty();

        while !stop.load(Ordering::Acquire) {
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    // Drain frames the decoder still holds back.
                    if !self.passthrough {
                        self.flush_decoder()?;
                    }
                    return Ok(self.pending.pop_front());
                }
                Err(e) => {
                    return Err(provider_error(
                        ErrorKind::FileReadError,
                        "Failed to read from file: {0}",
                        e,
                    ))
                }
            }

            if packet.stream() != self.stream_index {
                continue;
            }

            let frame = if self.passthrough {
                self.compressed_frame(&mut packet)?
            } else {
                self.decode_packet(&packet)?;
                self.pending.pop_front()
            };

            if let Some(frame) = frame {
                return Ok(Some(frame));
            }
        }

        Ok(None)
    }

    fn compressed_frame(&mut self, packet: &mut ffmpeg::Packet) -> Result<Option<Frame>> {
        if let Some(bsf) = self.bsf.as_mut() {
            if !bsf.filter(packet)? {
                return Ok(None);
            }
        }

        let Some(payload) = packet.data() else {
            return Ok(None);
        };

        let mut frame = Frame::new();
        frame.set_format(self.pixel_format, self.width, self.height);
        frame.add_compressed_plane(
            ColorChannel::Compressed,
            channel_format_for(self.pixel_format),
            8,
            payload,
            self.width,
            self.height,
        )?;

        frame.set_keyframe(packet.is_key());
        if let Some(pts) = packet.pts() {
            frame.set_timestamp_us(pts.rescale(self.time_base, US).max(0) as u64);
        }
        if let Some(dts) = packet.dts() {
            frame.set_decoder_timestamp_us(dts.rescale(self.time_base, US));
        }
        if frame.is_keyframe() {
            if let Some(extradata) = &self.extradata {
                frame.set_codec_extradata(extradata.clone());
            }
        }

        Ok(Some(frame))
    }

    fn decode_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        let decoder = self.decoder.as_mut().expect("decode path has a decoder");
        if let Err(e) = decoder.send_packet(packet) {
            // A corrupt packet is skipped, not fatal.
            warn!("Decoder rejected packet: {}", e);
            return Ok(());
        }
        self.receive_decoded()
    }

    fn flush_decoder(&mut self) -> Result<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };
        match decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => {
                return Err(provider_error(
                    ErrorKind::FileReadError,
                    "Cannot flush decoder: {0}",
                    e,
                ))
            }
        }
        self.receive_decoded()
    }

    fn receive_decoded(&mut self) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            let decoder = self.decoder.as_mut().expect("decode path has a decoder");
            match decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.yuv420_frame(&decoded)?;
                    self.pending.push_back(frame);
                }
                Err(ffmpeg::Error::Eof)
                | Err(ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN }) => return Ok(()),
                Err(e) => {
                    return Err(provider_error(
                        ErrorKind::FileReadError,
                        "Cannot receive decoded frame: {0}",
                        e,
                    ))
                }
            }
        }
    }

    /// Convert a decoded frame to planar YUV 4:2:0 and wrap it.
    fn yuv420_frame(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        use ffmpeg::software::scaling;
        use ffmpeg::util::format::Pixel;

        let needs_scaling = decoded.format() != Pixel::YUV420P;
        let source = if needs_scaling {
            let src = (decoded.format(), decoded.width(), decoded.height());
            if self.scaler_src != Some(src) {
                self.scaler = Some(
                    scaling::Context::get(
                        decoded.format(),
                        decoded.width(),
                        decoded.height(),
                        Pixel::YUV420P,
                        decoded.width(),
                        decoded.height(),
                        scaling::Flags::BILINEAR,
                    )
                    .map_err(|e| {
                        provider_error(
                            ErrorKind::FileReadError,
                            "Cannot create scale context: {0}",
                            e,
                        )
                    })?,
                );
                self.scaler_src = Some(src);
            }

            let mut converted = ffmpeg::frame::Video::empty();
            self.scaler
                .as_mut()
                .expect("scaler created above")
                .run(decoded, &mut converted)
                .map_err(|e| {
                    provider_error(ErrorKind::FileReadError, "Cannot convert frame: {0}", e)
                })?;
            converted.set_pts(decoded.pts());
            converted
        } else {
            decoded.clone()
        };

        let width = source.width();
        let height = source.height();

        let mut frame = Frame::new();
        frame.set_format(PixelFormat::Yuv420, width, height);
        frame.add_raw_plane(ColorChannel::Y, 8)?;
        frame.add_raw_plane(ColorChannel::U, 8)?;
        frame.add_raw_plane(ColorChannel::V, 8)?;

        copy_plane(&mut frame, ColorChannel::Y, &source, 0, width as usize)?;
        let chroma_row = width.div_ceil(2) as usize;
        copy_plane(&mut frame, ColorChannel::U, &source, 1, chroma_row)?;
        copy_plane(&mut frame, ColorChannel::V, &source, 2, chroma_row)?;

        if let Some(pts) = source.pts() {
            frame.set_timestamp_us(pts.rescale(self.time_base, US).max(0) as u64);
        }
        // A decoded frame is always independently displayable.
        frame.set_keyframe(true);

        Ok(frame)
    }

    /// Seek back to the start of the stream for looped playback.
    pub(crate) fn seek_to_beginning(&mut self) -> bool {
        if self.input.seek(0, ..=0).is_err() {
            return false;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.pending.clear();
        true
    }
}

fn copy_plane(
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

// --- file input -----------------------------------------------------------

/// A container file played back at its own speed.
pub struct FileInput {
    path: PathBuf,
    looping: bool,
    stop_mode: FileStopMode,
    reader: Option<Arc<Mutex<FileReader>>>,
    current_format: Option<VideoFormat>,
    sink: Arc<FrameSink>,
    stop: Arc<AtomicBool>,
    eos_sent: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            looping: true,
            stop_mode: FileStopMode::Pause,
            reader: None,
            current_format: None,
            sink: Arc::new(FrameSink::new()),
            stop: Arc::new(AtomicBool::new(false)),
            eos_sent: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restart from the beginning on end of file. Defaults to `true`.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// What `stop()` does to the producer. Defaults to [`FileStopMode::Pause`].
    pub fn set_stop_mode(&mut self, mode: FileStopMode) {
        self.stop_mode = mode;
    }

    pub fn stop_mode(&self) -> FileStopMode {
        self.stop_mode
    }

    fn open_if_needed(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        let reader = FileReader::open(&self.path)?;
        let framerate = reader.framerate();
        self.current_format = Some(VideoFormat::for_file(
            reader.width(),
            reader.height(),
            reader.pixel_format(),
            (framerate.numerator > 0).then_some(framerate),
        ));
        info!(
            "Opened {} as {}",
            self.path.display(),
            self.current_format.as_ref().expect("format just set")
        );
        self.reader = Some(Arc::new(Mutex::new(reader)));
        Ok(())
    }
}

impl Input for FileInput {
    fn display_name(&self) -> String {
        // The base filename, not the full path.
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn video_formats(&self) -> Vec<VideoFormat> {
        self.current_format.iter().cloned().collect()
    }

    fn configure(&mut self, _requested: Option<&VideoFormat>) -> Result<VideoFormat> {
        // The file dictates its own format; the request is informational.
        self.open_if_needed()?;
        Ok(self.current_format.clone().expect("open sets the format"))
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        self.sink.set_callback(callback);
    }

    fn start(&mut self) -> Result<()> {
        // In continue-with-drop mode the producer may still be running.
        if self.worker.is_some() {
            return Ok(());
        }

        self.open_if_needed()?;
        let reader = self.reader.clone().expect("open_if_needed sets the reader");
        let framerate = reader.lock().framerate();

        self.stop.store(false, Ordering::Release);
        self.eos_sent.store(false, Ordering::Release);

        let sink = self.sink.clone();
        let stop = self.stop.clone();
        let eos_sent = self.eos_sent.clone();
        let looping = self.looping;
        let path = self.path.clone();

        self.worker = Some(std::thread::spawn(move || {
            playback_loop(&reader, looping, framerate, &path, &sink, &stop, &eos_sent);
        }));

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stop_mode == FileStopMode::ContinueWithDrop {
            // The producer keeps running; overflowing frames are dropped.
            return Ok(());
        }

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.stop.store(true, Ordering::Release);
        let _ = worker.join();

        if !self.eos_sent.swap(true, Ordering::AcqRel) {
            self.sink.end_of_stream();
        }

        // Drop stale frames; the reader stays open at its current position
        // so a later start() resumes playback.
        self.sink.queue().clear_all();
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
        serde_json::to_string(&json!({
            "class": "file",
            "path": self.path.to_string_lossy(),
        }))
        .map_err(|e| {
            Error::new(ErrorKind::Internal, "Cannot serialize file input: {0}")
                .with_arg(0, e.to_string())
        })
    }
}

impl Drop for FileInput {
    fn drop(&mut self) {
        // Full stop regardless of stop mode.
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Background producer: reads, paces and queues frames until EOF or stop.
fn playback_loop(
    reader: &Mutex<FileReader>,
    looping: bool,
    framerate: Fraction,
    path: &Path,
    sink: &FrameSink,
    stop: &AtomicBool,
    eos_sent: &AtomicBool,
) {
    let mut pacer = FramePacer::new((framerate.numerator > 0).then_some(framerate));

    while !stop.load(Ordering::Acquire) {
        let next = reader.lock().read_next_frame(stop);

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if looping {
                    if !reader.lock().seek_to_beginning() {
                        error!("Cannot rewind {}; ending playback", path.display());
                        break;
                    }
                    // Timestamps restart after the seek.
                    pacer.reset();
                    continue;
                }
                break;
            }
            Err(e) => {
                error!("Error reading {}: {}", path.display(), e.full_message());
                break;
            }
        };

        let pts = (frame.timestamp_us() > 0).then(|| frame.timestamp_us());
        let target = pacer.target_for(pts, Instant::now());
        if !FramePacer::sleep_until(target, stop) {
            break;
        }

        sink.push_frame(frame);
    }

    if !stop.load(Ordering::Acquire) {
        // Natural end of playback (or a read failure): signal stream end.
        if !eos_sent.swap(true, Ordering::AcqRel) {
            sink.end_of_stream();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_looping_pause() {
        let input = FileInput::new("/media/clip.mp4");
        assert!(input.looping());
        assert_eq!(input.stop_mode(), FileStopMode::Pause);
        assert_eq!(input.source_kind(), SourceKind::File);
    }

    #[test]
    fn display_name_is_base_filename() {
        let input = FileInput::new("/media/recordings/clip.mp4");
        assert_eq!(input.display_name(), "clip.mp4");
    }

    #[test]
    fn serializes_class_and_path() {
        let input = FileInput::new("/media/clip.mp4");
        let data = input.serialize(SerializationFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["class"], "file");
        assert_eq!(value["path"], "/media/clip.mp4");
    }

    #[test]
    fn missing_file_reports_file_not_found() {
        let mut input = FileInput::new("/nonexistent/definitely-missing.mp4");
        let err = input.configure(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut input = FileInput::new("/media/clip.mp4");
        assert!(input.stop().is_ok());
        assert!(input.stop().is_ok());
    }

    #[test]
    fn passthrough_codecs() {
        assert!(is_passthrough_codec(ffmpeg::codec::Id::H264));
        assert!(is_passthrough_codec(ffmpeg::codec::Id::HEVC));
        assert!(is_passthrough_codec(ffmpeg::codec::Id::MJPEG));
        assert!(!is_passthrough_codec(ffmpeg::codec::Id::VP9));

        assert_eq!(codec_id_to_pixel_format(ffmpeg::codec::Id::H264), PixelFormat::H264);
        assert_eq!(codec_id_to_pixel_format(ffmpeg::codec::Id::VP9), PixelFormat::Yuv420);
    }
}
