//! Hold-to-confirm debouncing of per-frame gesture labels.
//!
//! A gesture only becomes a command once the same label has been seen
//! continuously for [`HoldConfirmTracker::threshold`]. Time is polled from the
//! caller on every frame; the tracker never sleeps.

use crate::classifier::Gesture;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_HOLD_THRESHOLD: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPhase {
    /// No label, or the label just disappeared.
    Idle,
    /// The same label is persisting but has not reached the threshold.
    Holding,
    /// The threshold was reached for this run; no further fires until the label changes.
    Confirmed,
}

/// Mutable state for the current label-continuity run.
#[derive(Debug, Clone, Copy)]
pub struct HoldState {
    pub label: Option<Gesture>,
    pub hold_start: Instant,
    pub confirmed: bool,
    pub progress: f32,
}

impl HoldState {
    fn reset(label: Option<Gesture>, now: Instant) -> Self {
        Self {
            label,
            hold_start: now,
            confirmed: false,
            progress: 0.0,
        }
    }
}

/// Result of feeding one frame to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldUpdate {
    /// Hold progress in `[0, 1]` for feedback rendering.
    pub progress: f32,
    /// Set on exactly one frame per continuous hold.
    pub fired: Option<Gesture>,
}

#[derive(Debug, Clone)]
pub struct HoldConfirmTracker {
    threshold: Duration,
    state: HoldState,
}

impl HoldConfirmTracker {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            state: HoldState::reset(None, now),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn state(&self) -> &HoldState {
        &self.state
    }

    pub fn phase(&self) -> HoldPhase {
        match (self.state.label, self.state.confirmed) {
            (None, _) => HoldPhase::Idle,
            (Some(_), false) => HoldPhase::Holding,
            (Some(_), true) => HoldPhase::Confirmed,
        }
    }

    /// Forces the tracker back to idle.
    pub fn reset(&mut self, now: Instant) {
        self.state = HoldState::reset(None, now);
    }

    /// Feeds the label classified for the frame observed at `now`.
    pub fn update(&mut self, label: Option<Gesture>, now: Instant) -> HoldUpdate {
        let Some(gesture) = label else {
            self.reset(now);
            return HoldUpdate {
                progress: 0.0,
                fired: None,
            };
        };

        if self.state.label != Some(gesture) {
            debug!(%gesture, "Hold started");
            self.state = HoldState::reset(Some(gesture), now);
        }

        if self.state.confirmed {
            return HoldUpdate {
                progress: 1.0,
                fired: None,
            };
        }

        let elapsed = now.saturating_duration_since(self.state.hold_start);
        if elapsed >= self.threshold {
            self.state.confirmed = true;
            self.state.progress = 1.0;
            debug!(%gesture, elapsed_ms = elapsed.as_millis() as u64, "Hold confirmed");
            return HoldUpdate {
                progress: 1.0,
                fired: Some(gesture),
            };
        }

        self.state.progress = (elapsed.as_secs_f32() / self.threshold.as_secs_f32()).min(1.0);
        HoldUpdate {
            progress: self.state.progress,
            fired: None,
        }
    }
}
