//! Bounded frame queue coupling one producer to one consumer.
//!
//! The queue is a strict FIFO with a fixed capacity. A full queue rejects
//! the pushed frame (the producer drops it and signals overflow); the
//! consumer can block on [`FrameQueue::wait_until_non_empty_or_stop`]
//! without spinning. Message callbacks are the caller's job and must be
//! invoked outside the queue lock.

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::frame::Frame;

/// Maximum number of frames a producer may queue ahead of the consumer.
pub const MAX_QUEUE_LENGTH: usize = 20;

/// Granularity of cooperative waits, so stop flags are observed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Result of a push attempt.
#[derive(Debug)]
pub enum PushOutcome {
    Accepted,
    /// The queue was full; the rejected frame is handed back so the caller
    /// can drop it and signal overflow.
    Overflowed(Frame),
}

/// Borrowed view of the queue's front frame.
///
/// Holds the queue lock; drop the reference before touching the queue again
/// from the same thread.
pub struct FrameRef<'a>(MappedMutexGuard<'a, Frame>);

impl std::ops::Deref for FrameRef<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.0
    }
}

/// Bounded FIFO of owned frames.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    non_empty: Condvar,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::with_capacity(MAX_QUEUE_LENGTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            non_empty: Condvar::new(),
        }
    }

    /// Append a frame, or report overflow when the queue is full.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut frames = self.frames.lock();
        if frames.len() < self.capacity {
            frames.push_back(frame);
            drop(frames);
            self.non_empty.notify_one();
            PushOutcome::Accepted
        } else {
            drop(frames);
            PushOutcome::Overflowed(frame)
        }
    }

    /// Borrow the front frame without removing it. The returned guard holds
    /// the queue lock; drop it before pushing or popping.
    pub fn peek(&self) -> Option<FrameRef<'_>> {
        MutexGuard::try_map(self.frames.lock(), |frames| frames.front_mut())
            .ok()
            .map(FrameRef)
    }

    /// Remove and return the front frame.
    pub fn pop(&self) -> Option<Frame> {
        self.frames.lock().pop_front()
    }

    /// Drop all queued frames.
    pub fn clear_all(&self) {
        self.frames.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Block until the queue is non-empty or `stop` is set.
    ///
    /// Returns `true` when a frame is available. The wait wakes at least
    /// every 50 ms to re-check the stop flag.
    pub fn wait_until_non_empty_or_stop(&self, stop: &AtomicBool) -> bool {
        let mut frames = self.frames.lock();
        while frames.is_empty() && !stop.load(Ordering::Acquire) {
            self.non_empty.wait_for(&mut frames, WAIT_SLICE);
        }
        !frames.is_empty()
    }

    /// Wake a consumer blocked in [`FrameQueue::wait_until_non_empty_or_stop`].
    pub fn wake(&self) {
        self.non_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn frame_with_ts(ts: u64) -> Frame {
        let mut frame = Frame::new();
        frame.set_timestamp_us(ts);
        frame
    }

    #[test]
    fn preserves_fifo_order() {
        let queue = FrameQueue::new();
        for ts in 0..5 {
            assert!(matches!(queue.push(frame_with_ts(ts)), PushOutcome::Accepted));
        }
        for ts in 0..5 {
            assert_eq!(queue.pop().unwrap().timestamp_us(), ts);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_keeps_first_frames() {
        // 25 pushes against capacity 20: the first 20 stay, the last 5
        // bounce back to the producer.
        let queue = FrameQueue::new();
        let mut overflows = 0;
        for ts in 0..25 {
            match queue.push(frame_with_ts(ts)) {
                PushOutcome::Accepted => {}
                PushOutcome::Overflowed(frame) => {
                    assert_eq!(frame.timestamp_us(), ts);
                    overflows += 1;
                }
            }
        }
        assert_eq!(overflows, 5);
        assert_eq!(queue.len(), MAX_QUEUE_LENGTH);
        for ts in 0..MAX_QUEUE_LENGTH as u64 {
            assert_eq!(queue.pop().unwrap().timestamp_us(), ts);
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let queue = FrameQueue::new();
        queue.push(frame_with_ts(7));
        assert_eq!(queue.peek().unwrap().timestamp_us(), 7);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().timestamp_us(), 7);
    }

    #[test]
    fn clear_all_empties_queue() {
        let queue = FrameQueue::new();
        for ts in 0..10 {
            queue.push(frame_with_ts(ts));
        }
        queue.clear_all();
        assert!(queue.is_empty());
    }

    #[test]
    fn wait_wakes_on_push() {
        let queue = Arc::new(FrameQueue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.push(frame_with_ts(1));
            })
        };

        assert!(queue.wait_until_non_empty_or_stop(&stop));
        producer.join().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn wait_unblocks_on_stop() {
        let queue = FrameQueue::new();
        let stop = AtomicBool::new(true);
        assert!(!queue.wait_until_non_empty_or_stop(&stop));
    }
}
