//! Display State
//!
//! Five independent slots, one per channel. Text slots are replaced outright;
//! axis slots run a retargetable transition.

use std::time::Instant;

use serde::Serialize;

use super::geometry::AxisGeometry;
use super::transition::AxisSlot;
use crate::record::{Channel, UpdateBatch, UpdateRecord, UpdateValue};

/// Text shown in the lap time slot before any update
pub const INITIAL_LAP_TIME: &str = "00:00.0";
/// Text shown in the lap compare slot before any update
pub const INITIAL_LAP_COMPARE: &str = "\u{b1}00.0";
/// Text shown in the zone slot before any update
pub const INITIAL_CURRENT_ZONE: &str = "Current Zone";

/// Visual state of the cluster
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayState {
    lap_time: String,
    lap_compare: String,
    current_zone: String,
    horizontal: AxisSlot,
    vertical: AxisSlot,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayState {
    /// Initial display: placeholder texts, both markers at their anchors
    #[must_use]
    pub fn new() -> Self {
        Self {
            lap_time: INITIAL_LAP_TIME.to_string(),
            lap_compare: INITIAL_LAP_COMPARE.to_string(),
            current_zone: INITIAL_CURRENT_ZONE.to_string(),
            horizontal: AxisSlot::new(AxisGeometry::HORIZONTAL),
            vertical: AxisSlot::new(AxisGeometry::VERTICAL),
        }
    }

    /// Apply one record at `now`
    pub fn apply(&mut self, record: &UpdateRecord, now: Instant) {
        match (record.channel(), record.value()) {
            (Channel::LapTime, UpdateValue::Text(text)) => text.clone_into(&mut self.lap_time),
            (Channel::LapCompare, UpdateValue::Text(text)) => {
                text.clone_into(&mut self.lap_compare);
            }
            (Channel::CurrentZone, UpdateValue::Text(text)) => {
                text.clone_into(&mut self.current_zone);
            }
            (Channel::AccelX, UpdateValue::Axis(v)) => self.horizontal.retarget(*v, now),
            (Channel::AccelY, UpdateValue::Axis(v)) => self.vertical.retarget(*v, now),
            (channel, value) => {
                tracing::debug!(%channel, %value, "Record value does not match channel kind");
            }
        }
    }

    /// Apply every record of `batch` in arrival order
    ///
    /// Returns the number of records applied.
    pub fn apply_batch(&mut self, batch: &UpdateBatch, now: Instant) -> usize {
        for record in batch {
            self.apply(record, now);
        }
        batch.len()
    }

    /// Current lap time text
    #[must_use]
    pub fn lap_time(&self) -> &str {
        &self.lap_time
    }

    /// Current lap compare text
    #[must_use]
    pub fn lap_compare(&self) -> &str {
        &self.lap_compare
    }

    /// Current zone text
    #[must_use]
    pub fn current_zone(&self) -> &str {
        &self.current_zone
    }

    /// Horizontal (lateral) axis slot
    #[must_use]
    pub fn horizontal(&self) -> &AxisSlot {
        &self.horizontal
    }

    /// Vertical (longitudinal) axis slot
    #[must_use]
    pub fn vertical(&self) -> &AxisSlot {
        &self.vertical
    }

    /// Whether any marker is still moving at `now`
    #[must_use]
    pub fn is_animating(&self, now: Instant) -> bool {
        self.horizontal.is_animating(now) || self.vertical.is_animating(now)
    }

    /// Retire finished transitions
    pub fn settle(&mut self, now: Instant) {
        self.horizontal.settle(now);
        self.vertical.settle(now);
    }

    /// Snapshot of the drawable values at `now`
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> DisplaySnapshot {
        DisplaySnapshot {
            lap_time: self.lap_time.clone(),
            lap_compare: self.lap_compare.clone(),
            current_zone: self.current_zone.clone(),
            horizontal_x: self.horizontal.position_at(now),
            vertical_y: self.vertical.position_at(now),
        }
    }
}

/// Drawable values at one instant
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    /// Lap time text
    pub lap_time: String,
    /// Lap compare text
    pub lap_compare: String,
    /// Zone text
    pub current_zone: String,
    /// Left edge of the horizontal marker
    pub horizontal_x: f64,
    /// Top edge of the vertical marker
    pub vertical_y: f64,
}
