//! Volume ramp timeline
//!
//! A `Fader` maps elapsed time onto a volume multiplier through an easing
//! curve. Rising faders run forward from 0 to their duration; falling faders
//! run backward from their duration to 0, so the same curve serves both.
//!
//! The fader itself is a plain value. The pipeline's command worker owns it,
//! advances it on a fixed tick and applies `value()` as the volume modifier.

use rivulet_common::FadeCurve;
use std::time::Duration;
use tracing::debug;

/// Tick interval of a running fader
pub const FADER_TICK: Duration = Duration::from_millis(40);

/// Wait after a track-to-track fade before reporting completion
pub const FADER_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Wait after a pause/resume fade before reporting completion
pub const PAUSE_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Direction of a ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    /// Time runs from 0 up to the duration (fade in)
    Forward,
    /// Time runs from the duration down to 0 (fade out)
    Backward,
}

#[derive(Debug, Clone)]
pub struct Fader {
    duration: Duration,
    current: Duration,
    direction: FadeDirection,
    curve: FadeCurve,
    use_settle_delay: bool,
    running: bool,
}

impl Fader {
    /// Start a new ramp
    ///
    /// When `previous` is still running, the new ramp starts at the time with
    /// the same progress as the old one so the volume does not jump: the
    /// elapsed time carries over unchanged for equal durations and is scaled
    /// proportionally otherwise.
    pub fn start(
        duration: Duration,
        direction: FadeDirection,
        curve: FadeCurve,
        use_settle_delay: bool,
        previous: Option<&Fader>,
    ) -> Self {
        let mut start = match direction {
            FadeDirection::Forward => Duration::ZERO,
            FadeDirection::Backward => duration,
        };
        if let Some(prev) = previous.filter(|f| f.is_running()) {
            if prev.duration == duration {
                start = prev.current;
            } else if !prev.duration.is_zero() {
                let ratio = prev.current.as_secs_f64() / prev.duration.as_secs_f64();
                start = Duration::from_millis((duration.as_millis() as f64 * ratio).round() as u64);
            }
            debug!(
                "Fader replaces a running one at {:?}/{:?}, starting at {:?}/{:?}",
                prev.current, prev.duration, start, duration
            );
        }

        let mut fader = Self {
            duration,
            current: start.min(duration),
            direction,
            curve,
            use_settle_delay,
            running: true,
        };
        fader.running = !fader.at_end();
        fader
    }

    fn at_end(&self) -> bool {
        match self.direction {
            FadeDirection::Forward => self.current >= self.duration,
            FadeDirection::Backward => self.current.is_zero(),
        }
    }

    /// Volume multiplier at the current time
    pub fn value(&self) -> f64 {
        if self.duration.is_zero() {
            return match self.direction {
                FadeDirection::Forward => 1.0,
                FadeDirection::Backward => 0.0,
            };
        }
        self.curve
            .value(self.current.as_secs_f64() / self.duration.as_secs_f64())
    }

    /// Move time along by `elapsed`; returns true when the ramp just ended
    ///
    /// Time is kept at full precision so uneven ticks add up exactly.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        if !self.running {
            return false;
        }
        self.current = match self.direction {
            FadeDirection::Forward => (self.current + elapsed).min(self.duration),
            FadeDirection::Backward => self.current.saturating_sub(elapsed),
        };
        if self.at_end() {
            self.running = false;
            return true;
        }
        false
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_time(&self) -> Duration {
        self.current
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn direction(&self) -> FadeDirection {
        self.direction
    }

    /// Delay between the end of the ramp and the finished notification
    ///
    /// Masks output latency of the audio driver. Pause fades use a short delay
    /// so resuming does not stutter.
    pub fn settle_delay(&self) -> Duration {
        if self.use_settle_delay {
            FADER_SETTLE_DELAY
        } else {
            PAUSE_SETTLE_DELAY
        }
    }
}
