//! Video input producers.
//!
//! Every input owns a background producer task that reads from its source,
//! wraps the payload into frames and pushes them into a bounded queue. The
//! consumer observes the queue through [`Input::peek_frame`] /
//! [`Input::pop_frame`] and is notified through the message callback.

pub mod camera;
pub mod file;
mod pacer;
pub mod rtsp;

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::Result;
use crate::frame::Frame;
use crate::queue::{FrameQueue, FrameRef, PushOutcome};
use crate::video_format::{SerializationFormat, VideoFormat};

/// The family a video input belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    Rtsp,
    File,
}

/// Signals delivered to the consumer through the message callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMessage {
    /// A new frame was appended to the queue.
    NewFrame,
    /// The source ended; delivered exactly once per start/stop cycle.
    EndOfStream,
    /// The queue was full and the newest frame was dropped.
    InputOverflow,
}

/// Consumer notification callback. The closure owns whatever context it
/// needs; it is invoked from the producer thread, outside the queue lock.
pub type MessageCallback = Arc<dyn Fn(InputMessage) + Send + Sync>;

/// A video input: a frame source feeding a bounded queue.
pub trait Input: Send {
    /// Human-visible label: camera card name, URL, or base filename.
    fn display_name(&self) -> String;

    fn source_kind(&self) -> SourceKind;

    /// The configurations this input can deliver. Network and file inputs
    /// may return an empty list until they have been configured, because
    /// they only learn their format on open.
    fn video_formats(&self) -> Vec<VideoFormat>;

    /// Transition from discovered to configured and report the actual
    /// format. Network and file inputs dictate their own format; `requested`
    /// is informational for them.
    fn configure(&mut self, requested: Option<&VideoFormat>) -> Result<VideoFormat>;

    /// Register the sink for new-frame / end-of-stream / overflow signals.
    fn set_message_callback(&self, callback: MessageCallback);

    /// Spawn the producer task.
    fn start(&mut self) -> Result<()>;

    /// Request the producer task to terminate and signal end-of-stream.
    /// Repeated stops are no-ops; the input remains restartable.
    fn stop(&mut self) -> Result<()>;

    /// Borrow the oldest queued frame without consuming it.
    fn peek_frame(&self) -> Option<FrameRef<'_>>;

    /// Remove and return the oldest queued frame.
    fn pop_frame(&self) -> Option<Frame>;

    /// Encode enough information to re-find this input later.
    fn serialize(&self, format: SerializationFormat) -> Result<String>;
}

/// Queue plus consumer signalling, shared between an input and its
/// producer thread.
pub(crate) struct FrameSink {
    queue: FrameQueue,
    callback: RwLock<Option<MessageCallback>>,
}

impl FrameSink {
    pub(crate) fn new() -> Self {
        Self {
            queue: FrameQueue::new(),
            callback: RwLock::new(None),
        }
    }

    pub(crate) fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub(crate) fn set_callback(&self, callback: MessageCallback) {
        *self.callback.write() = Some(callback);
    }

    pub(crate) fn notify(&self, message: InputMessage) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    /// Push a frame and deliver the matching signal. On overflow the frame
    /// is dropped here, at the producer side.
    pub(crate) fn push_frame(&self, frame: Frame) {
        match self.queue.push(frame) {
            PushOutcome::Accepted => self.notify(InputMessage::NewFrame),
            PushOutcome::Overflowed(frame) => {
                drop(frame);
                self.notify(InputMessage::InputOverflow);
            }
        }
    }

    /// Signal end-of-stream and wake any blocked consumer.
    pub(crate) fn end_of_stream(&self) {
        self.queue.wake();
        self.notify(InputMessage::EndOfStream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use crate::queue::MAX_QUEUE_LENGTH;

    #[test]
    fn sink_signals_new_frame_and_overflow() {
        let sink = FrameSink::new();
        let messages: Arc<Mutex<Vec<InputMessage>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let messages = messages.clone();
            sink.set_callback(Arc::new(move |msg| messages.lock().push(msg)));
        }

        for _ in 0..MAX_QUEUE_LENGTH + 5 {
            sink.push_frame(Frame::new());
        }
        sink.end_of_stream();

        let messages = messages.lock();
        let new_frames = messages.iter().filter(|m| **m == InputMessage::NewFrame).count();
        let overflows = messages
            .iter()
            .filter(|m| **m == InputMessage::InputOverflow)
            .count();
        let eos = messages
            .iter()
            .filter(|m| **m == InputMessage::EndOfStream)
            .count();

        assert_eq!(new_frames, MAX_QUEUE_LENGTH);
        assert_eq!(overflows, 5);
        assert_eq!(eos, 1);
        assert_eq!(sink.queue().len(), MAX_QUEUE_LENGTH);
    }
}
