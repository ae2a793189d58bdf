//! Pausable stopwatch measuring active time.
//!
//! The clock never reads the time on its own; every operation takes the
//! current `Instant` so the controller (and tests) decide what "now" is.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerState {
    pub elapsed: Duration,
    pub running: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Clock {
    /// Time accumulated from earlier running windows; combines with
    /// `running_anchor` to give the active duration.
    baseline: Duration,
    running_anchor: Option<Instant>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running_anchor.is_some()
    }

    /// Sum of all running windows up to `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.running_anchor {
            Some(anchor) => self
                .baseline
                .saturating_add(now.saturating_duration_since(anchor)),
            None => self.baseline,
        }
    }

    pub fn state(&self, now: Instant) -> TimerState {
        TimerState {
            elapsed: self.elapsed(now),
            running: self.is_running(),
        }
    }

    pub fn play(&mut self, now: Instant) {
        if self.running_anchor.is_none() {
            self.running_anchor = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(anchor) = self.running_anchor.take() {
            self.baseline = self
                .baseline
                .saturating_add(now.saturating_duration_since(anchor));
        }
    }

    /// Back to zero. A running clock keeps running from zero.
    pub fn reset(&mut self, now: Instant) {
        self.baseline = Duration::ZERO;
        if self.running_anchor.is_some() {
            self.running_anchor = Some(now);
        }
    }

    pub fn toggle(&mut self, now: Instant) {
        if self.is_running() {
            self.pause(now);
        } else {
            self.play(now);
        }
    }
}

/// Formats whole seconds as `m:ss`, or `h:mm:ss` from one hour on.
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    let seconds = total % 60;
    let minutes = total / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{hours}:{:02}:{seconds:02}", minutes % 60)
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
