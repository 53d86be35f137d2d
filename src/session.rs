//! Capture session façade.
//!
//! A [`CaptureSession`] binds an input to a consumer: it owns the input, an
//! optional format converter, and drives a blocking consume loop that hands
//! every delivered frame to a caller-supplied handler. All pipeline state
//! is per-session; nothing is shared between sessions.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

use crate::convert::FormatConverter;
use crate::error::Result;
use crate::frame::Frame;
use crate::input::{Input, InputMessage};
use crate::video_format::VideoFormat;

/// Decision returned by the frame handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    Stop,
}

/// Waiting granularity of the consume loop.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Binds one input to one consumer.
pub struct CaptureSession {
    input: Box<dyn Input>,
    converter: Option<FormatConverter>,
}

impl CaptureSession {
    pub fn new(input: Box<dyn Input>) -> Self {
        Self {
            input,
            converter: None,
        }
    }

    /// Convert every delivered frame before it reaches the handler.
    pub fn set_converter(&mut self, converter: FormatConverter) {
        self.converter = Some(converter);
    }

    pub fn input(&self) -> &dyn Input {
        self.input.as_ref()
    }

    pub fn input_mut(&mut self) -> &mut dyn Input {
        self.input.as_mut()
    }

    /// Configure the underlying input.
    pub fn configure(&mut self, requested: Option<&VideoFormat>) -> Result<VideoFormat> {
        self.input.configure(requested)
    }

    /// Start the input and block, forwarding each delivered frame to
    /// `handler`, until the handler requests stop or the input signals
    /// end-of-stream. Frames still queued when the stream ends are
    /// delivered before returning.
    pub fn run_synchronously<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&Frame) -> FrameAction,
    {
        let state: Arc<(Mutex<bool>, Condvar)> = Arc::new((Mutex::new(true), Condvar::new()));

        {
            let state = state.clone();
            self.input.set_message_callback(Arc::new(move |message| {
                let (active, wakeup) = &*state;
                match message {
                    InputMessage::EndOfStream => {
                        *active.lock() = false;
                        wakeup.notify_one();
                    }
                    InputMessage::NewFrame => wakeup.notify_one(),
                    InputMessage::InputOverflow => {}
                }
            }));
        }

        self.input.start()?;

        let mut stopped_input = false;
        loop {
            // Wait for a frame or for the stream to end.
            {
                let (active, wakeup) = &*state;
                let mut active = active.lock();
                while *active && self.input.peek_frame().is_none() {
                    wakeup.wait_for(&mut active, POLL_SLICE);
                }
            }

            let still_active = *state.0.lock();
            if !still_active && !stopped_input {
                // Stop producing; frames already queued are still delivered.
                self.input.stop()?;
                stopped_input = true;
            }

            while let Some(frame) = self.input.pop_frame() {
                if self.deliver(&frame, &mut handler)? == FrameAction::Stop {
                    *state.0.lock() = false;
                    if !stopped_input {
                        self.input.stop()?;
                        stopped_input = true;
                    }
                }
            }

            if !*state.0.lock() {
                break;
            }
        }

        // Drain frames a compressed converter may still hold back.
        if let Some(converter) = self.converter.as_mut() {
            converter.flush()?;
            while let Some(frame) = converter.pull() {
                handler(&frame);
            }
        }

        if !stopped_input {
            self.input.stop()?;
        }
        Ok(())
    }

    fn deliver<F>(&mut self, frame: &Frame, handler: &mut F) -> Result<FrameAction>
    where
        F: FnMut(&Frame) -> FrameAction,
    {
        let Some(converter) = self.converter.as_mut() else {
            return Ok(handler(frame));
        };

        converter.push(frame)?;
        let mut action = FrameAction::Continue;
        while let Some(converted) = converter.pull() {
            if handler(&converted) == FrameAction::Stop {
                action = FrameAction::Stop;
            }
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::format::PixelFormat;
    use crate::input::{FrameSink, MessageCallback, SourceKind};
    use crate::queue::FrameRef;
    use crate::video_format::{SerializationFormat, VideoFormat};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;

    /// Producer that emits a fixed number of frames, then end-of-stream.
    struct ScriptedInput {
        frames: u64,
        sink: Arc<FrameSink>,
        stop: Arc<AtomicBool>,
        eos_sent: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    }

    impl ScriptedInput {
        fn new(frames: u64) -> Self {
            Self {
                frames,
                sink: Arc::new(FrameSink::new()),
                stop: Arc::new(AtomicBool::new(false)),
                eos_sent: Arc::new(AtomicBool::new(false)),
                worker: None,
            }
        }
    }

    impl Input for ScriptedInput {
        fn display_name(&self) -> String {
            "scripted".into()
        }

        fn source_kind(&self) -> SourceKind {
            SourceKind::File
        }

        fn video_formats(&self) -> Vec<VideoFormat> {
            Vec::new()
        }

        fn configure(&mut self, _requested: Option<&VideoFormat>) -> Result<VideoFormat> {
            Ok(VideoFormat::for_file(2, 1, PixelFormat::Yuyv, None))
        }

        fn set_message_callback(&self, callback: MessageCallback) {
            self.sink.set_callback(callback);
        }

        fn start(&mut self) -> Result<()> {
            let sink = self.sink.clone();
            let stop = self.stop.clone();
            let eos_sent = self.eos_sent.clone();
            let frames = self.frames;
            self.worker = Some(std::thread::spawn(move || {
                for n in 0..frames {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    let mut frame = Frame::new();
                    frame.set_timestamp_us(n * 1_000);
                    sink.push_frame(frame);
                    std::thread::sleep(Duration::from_millis(1));
                }
                if !eos_sent.swap(true, Ordering::AcqRel) {
                    sink.end_of_stream();
                }
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
            Ok(())
        }

        fn peek_frame(&self) -> Option<FrameRef<'_>> {
            self.sink.queue().peek()
        }

        fn pop_frame(&self) -> Option<Frame> {
            self.sink.queue().pop()
        }

        fn serialize(&self, _format: SerializationFormat) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn delivers_all_frames_then_returns_on_end_of_stream() {
        let mut session = CaptureSession::new(Box::new(ScriptedInput::new(10)));
        let mut timestamps = Vec::new();

        session
            .run_synchronously(|frame| {
                timestamps.push(frame.timestamp_us());
                FrameAction::Continue
            })
            .unwrap();

        assert_eq!(timestamps.len(), 10);
        // Presentation order is preserved end to end.
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn handler_stop_ends_the_session() {
        let mut session = CaptureSession::new(Box::new(ScriptedInput::new(1_000)));
        let mut seen = 0u32;

        session
            .run_synchronously(|_frame| {
                seen += 1;
                if seen >= 5 {
                    FrameAction::Stop
                } else {
                    FrameAction::Continue
                }
            })
            .unwrap();

        assert!(seen >= 5);
        assert!(seen < 1_000);
    }
}
