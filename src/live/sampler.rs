use std::time::{Duration, Instant};

/// Default sampling period for live inference.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1500);

/// One firing of the sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleTick {
    pub seq: u64,
    pub at: Instant,
}

/// Why a tick did not start work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    CameraOff,
    Busy,
    FrameNotReady,
    CaptureFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub ticks: u64,
    pub accepted: u64,
    pub dropped_camera_off: u64,
    pub dropped_busy: u64,
    pub dropped_not_ready: u64,
    pub dropped_capture_failed: u64,
}

/// Fixed-period tick source.
///
/// Deadlines stay on a fixed grid anchored at the first deadline. When the
/// caller falls behind, the missed deadlines are skipped rather than fired in
/// a burst, so the outbound request rate is bounded by one per interval.
#[derive(Debug)]
pub struct FrameSampler {
    interval: Duration,
    next_deadline: Instant,
    seq: u64,
    stats: SamplerStats,
}

impl FrameSampler {
    /// Create a sampler whose first tick fires one interval after `start`.
    pub fn new(interval: Duration, start: Instant) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        Self {
            interval,
            next_deadline: start + interval,
            seq: 0,
            stats: SamplerStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Re-anchor the grid so the next tick fires one interval after `now`.
    pub fn restart(&mut self, now: Instant) {
        self.next_deadline = now + self.interval;
    }

    pub fn time_until_next(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }

    /// Fire a tick if the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<SampleTick> {
        if now < self.next_deadline {
            return None;
        }
        let tick = SampleTick {
            seq: self.seq,
            at: self.next_deadline,
        };
        self.seq += 1;
        self.stats.ticks += 1;

        let behind = now.duration_since(self.next_deadline);
        let skipped = behind.as_nanos() / self.interval.as_nanos();
        if skipped > 0 {
            log::debug!("sampler: skipped {} missed deadline(s)", skipped);
        }
        let next = u32::try_from(skipped + 1)
            .ok()
            .and_then(|steps| self.interval.checked_mul(steps))
            .and_then(|advance| self.next_deadline.checked_add(advance));
        match next {
            Some(next) => self.next_deadline = next,
            // Too far behind to stay on the grid.
            None => self.restart(now),
        }
        Some(tick)
    }

    pub fn record_accepted(&mut self) {
        self.stats.accepted += 1;
    }

    pub fn record_drop(&mut self, tick: SampleTick, reason: DropReason) {
        match reason {
            DropReason::CameraOff => self.stats.dropped_camera_off += 1,
            DropReason::Busy => self.stats.dropped_busy += 1,
            DropReason::FrameNotReady => self.stats.dropped_not_ready += 1,
            DropReason::CaptureFailed => self.stats.dropped_capture_failed += 1,
        }
        log::debug!("sampler: tick #{} dropped ({:?})", tick.seq, reason);
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }
}
