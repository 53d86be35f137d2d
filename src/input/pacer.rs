//! Wall-clock pacing of presentation timestamps.
//!
//! The file producer delivers frames at the speed their PTS dictates: the
//! first frame anchors a wall-clock origin, every later frame sleeps until
//! `wall_start + (pts - pts_start)`. Sleeps are sliced so a stop request is
//! observed within 50 ms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::format::Fraction;

/// Longest uninterruptible sleep slice.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Frame interval used when neither PTS nor framerate are usable (25 fps).
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(40_000);

pub(crate) struct FramePacer {
    anchored: bool,
    wall_start: Instant,
    pts_start: u64,
    /// Target of the previous frame, advanced by the fallback interval when
    /// a frame carries no usable PTS.
    last_target: Instant,
    fallback_interval: Duration,
}

impl FramePacer {
    pub(crate) fn new(framerate: Option<Fraction>) -> Self {
        let fallback_interval = match framerate {
            Some(fr) if fr.numerator > 0 => Duration::from_micros(
                1_000_000u64 * u64::from(fr.denominator) / u64::from(fr.numerator),
            ),
            _ => DEFAULT_FRAME_INTERVAL,
        };
        let now = Instant::now();
        Self {
            anchored: false,
            wall_start: now,
            pts_start: 0,
            last_target: now,
            fallback_interval,
        }
    }

    /// Re-anchor on the next frame (after a loop wrap the PTS restarts).
    pub(crate) fn reset(&mut self) {
        self.anchored = false;
    }

    /// Compute the wall-clock instant at which the frame with the given PTS
    /// should be delivered. The anchoring frame is due immediately.
    pub(crate) fn target_for(&mut self, pts_us: Option<u64>, now: Instant) -> Instant {
        if !self.anchored {
            self.anchored = true;
            self.wall_start = now;
            self.pts_start = pts_us.unwrap_or(0);
            self.last_target = now;
            return now;
        }

        let target = match pts_us {
            Some(pts) if pts > self.pts_start => {
                self.wall_start + Duration::from_micros(pts - self.pts_start)
            }
            Some(_) => now,
            None => self.last_target + self.fallback_interval,
        };
        self.last_target = target;
        target
    }

    /// Sleep until `target`, re-checking `stop` at least every 50 ms.
    /// Returns `false` when the sleep was cut short by a stop request.
    pub(crate) fn sleep_until(target: Instant, stop: &AtomicBool) -> bool {
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= target {
                return true;
            }
            std::thread::sleep((target - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_due_immediately() {
        let mut pacer = FramePacer::new(Some(Fraction::new(25, 1)));
        let now = Instant::now();
        assert_eq!(pacer.target_for(Some(100_000), now), now);
    }

    #[test]
    fn targets_follow_pts_deltas() {
        let mut pacer = FramePacer::new(Some(Fraction::new(25, 1)));
        let start = Instant::now();
        pacer.target_for(Some(0), start);

        assert_eq!(
            pacer.target_for(Some(40_000), start),
            start + Duration::from_micros(40_000)
        );
        assert_eq!(
            pacer.target_for(Some(80_000), start),
            start + Duration::from_micros(80_000)
        );
    }

    #[test]
    fn non_monotonic_pts_is_due_immediately() {
        let mut pacer = FramePacer::new(None);
        let start = Instant::now();
        pacer.target_for(Some(50_000), start);

        let later = start + Duration::from_millis(5);
        assert_eq!(pacer.target_for(Some(10_000), later), later);
    }

    #[test]
    fn missing_pts_paces_by_framerate() {
        let mut pacer = FramePacer::new(Some(Fraction::new(50, 1)));
        let start = Instant::now();
        pacer.target_for(None, start);

        assert_eq!(
            pacer.target_for(None, start),
            start + Duration::from_micros(20_000)
        );
        assert_eq!(
            pacer.target_for(None, start),
            start + Duration::from_micros(40_000)
        );
    }

    #[test]
    fn reset_reanchors_on_next_frame() {
        let mut pacer = FramePacer::new(Some(Fraction::new(25, 1)));
        let start = Instant::now();
        pacer.target_for(Some(0), start);
        pacer.target_for(Some(40_000), start);

        pacer.reset();
        let resumed = start + Duration::from_secs(3);
        // PTS restarts at zero after a seek; no sleep on the anchor frame.
        assert_eq!(pacer.target_for(Some(0), resumed), resumed);
        assert_eq!(
            pacer.target_for(Some(40_000), resumed),
            resumed + Duration::from_micros(40_000)
        );
    }

    #[test]
    fn stop_interrupts_sleep() {
        let stop = AtomicBool::new(true);
        let far = Instant::now() + Duration::from_secs(60);
        assert!(!FramePacer::sleep_until(far, &stop));
    }

    #[test]
    fn default_interval_is_25fps() {
        let pacer = FramePacer::new(None);
        assert_eq!(pacer.fallback_interval, Duration::from_micros(40_000));
    }
}
