//! Axis Transitions
//!
//! An axis slot holds at most one transition. A new target never queues
//! behind the running one: the transition is restarted from wherever the
//! marker is at that instant, so the marker path stays continuous.

use std::time::{Duration, Instant};

use super::geometry::AxisGeometry;
use super::timing::EasingFunction;

/// Duration of every axis transition
pub const AXIS_TRANSITION: Duration = Duration::from_millis(100);

/// A single time-boxed move between two coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisTransition {
    /// Coordinate at `started_at`
    pub from: f64,
    /// Coordinate reached after `duration`
    pub to: f64,
    /// When the move began
    pub started_at: Instant,
    /// How long the move takes
    pub duration: Duration,
    /// Progress curve
    pub easing: EasingFunction,
}

impl AxisTransition {
    /// Progress in [0.0, 1.0] at `now`
    #[must_use]
    pub fn progress_at(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        #[allow(clippy::cast_precision_loss)]
        let ratio = elapsed.as_nanos() as f64 / self.duration.as_nanos() as f64;
        ratio.clamp(0.0, 1.0)
    }

    /// Coordinate at `now`
    #[must_use]
    pub fn position_at(&self, now: Instant) -> f64 {
        let t = self.easing.apply(self.progress_at(now));
        self.from + (self.to - self.from) * t
    }

    /// Whether the move has completed at `now`
    #[must_use]
    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress_at(now) >= 1.0
    }
}

/// Display slot for one axis channel
#[derive(Clone, Debug, PartialEq)]
pub struct AxisSlot {
    geometry: AxisGeometry,
    duration: Duration,
    easing: EasingFunction,
    /// Position when no transition is running
    resting: f64,
    transition: Option<AxisTransition>,
    retargets: u64,
}

impl AxisSlot {
    /// Slot at rest on the geometry's anchor
    #[must_use]
    pub fn new(geometry: AxisGeometry) -> Self {
        Self::with_timing(geometry, AXIS_TRANSITION, EasingFunction::Linear)
    }

    /// Slot with custom transition timing
    #[must_use]
    pub fn with_timing(geometry: AxisGeometry, duration: Duration, easing: EasingFunction) -> Self {
        Self {
            geometry,
            duration,
            easing,
            resting: geometry.anchor,
            transition: None,
            retargets: 0,
        }
    }

    /// Geometry used to map values
    #[must_use]
    pub fn geometry(&self) -> AxisGeometry {
        self.geometry
    }

    /// Move towards the coordinate for `value`, starting from the current
    /// position at `now`
    pub fn retarget(&mut self, value: f64, now: Instant) {
        let from = self.position_at(now);
        let to = self.geometry.target(value);
        if let Some(running) = &self.transition {
            if !running.is_finished(now) {
                self.retargets += 1;
                tracing::trace!(from, to, previous_target = running.to, "Axis retargeted");
            }
        }
        self.transition = Some(AxisTransition {
            from,
            to,
            started_at: now,
            duration: self.duration,
            easing: self.easing,
        });
    }

    /// Marker coordinate at `now`
    #[must_use]
    pub fn position_at(&self, now: Instant) -> f64 {
        self.transition
            .as_ref()
            .map_or(self.resting, |t| t.position_at(now))
    }

    /// Coordinate the marker is heading to
    #[must_use]
    pub fn target(&self) -> f64 {
        self.transition.as_ref().map_or(self.resting, |t| t.to)
    }

    /// The running (or last) transition
    #[must_use]
    pub fn transition(&self) -> Option<&AxisTransition> {
        self.transition.as_ref()
    }

    /// Whether a transition is still moving at `now`
    #[must_use]
    pub fn is_animating(&self, now: Instant) -> bool {
        self.transition.as_ref().is_some_and(|t| !t.is_finished(now))
    }

    /// Drop a finished transition, leaving the marker at rest on its target
    pub fn settle(&mut self, now: Instant) {
        if let Some(t) = self.transition {
            if t.is_finished(now) {
                self.resting = t.to;
                self.transition = None;
            }
        }
    }

    /// Times a running transition was interrupted by a new target
    #[must_use]
    pub fn retargets(&self) -> u64 {
        self.retargets
    }
}
