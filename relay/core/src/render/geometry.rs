//! Dashboard Geometry
//!
//! Fixed layout of the instrument cluster in its 970 x 580 reference space,
//! origin top-left, y growing downwards. Surfaces scale this to whatever they
//! draw on.

use serde::Serialize;

/// Width of the reference drawing space
pub const CANVAS_WIDTH: f64 = 970.0;

/// Height of the reference drawing space
pub const CANVAS_HEIGHT: f64 = 580.0;

/// Pixels of deflection for a normalized value of 1.0
pub const AXIS_SCALE: f64 = 165.0;

/// Which way a positive value moves the marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisDirection {
    /// Positive values move towards smaller coordinates
    Decreasing,
    /// Positive values move towards larger coordinates
    Increasing,
}

/// Maps a normalized axis value to a marker coordinate
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AxisGeometry {
    /// Coordinate of the marker at rest (value 0.0)
    pub anchor: f64,
    /// Pixels per unit of value
    pub scale: f64,
    /// Direction of positive deflection
    pub direction: AxisDirection,
}

impl AxisGeometry {
    /// Lateral bar: x coordinate, positive values move it left
    pub const HORIZONTAL: Self = Self {
        anchor: 797.0,
        scale: AXIS_SCALE,
        direction: AxisDirection::Decreasing,
    };

    /// Longitudinal bar: y coordinate, positive values move it down
    pub const VERTICAL: Self = Self {
        anchor: 167.0,
        scale: AXIS_SCALE,
        direction: AxisDirection::Increasing,
    };

    /// Target coordinate for `value`
    ///
    /// The deflection is rounded to a whole pixel (half away from zero)
    /// before it is applied to the anchor.
    #[must_use]
    pub fn target(&self, value: f64) -> f64 {
        let offset = (value * self.scale).round();
        match self.direction {
            AxisDirection::Decreasing => self.anchor - offset,
            AxisDirection::Increasing => self.anchor + offset,
        }
    }
}

/// Axis-aligned rectangle in reference coordinates
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Rect {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Rect {
    /// Create a rectangle
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre point
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Panel rectangles of the cluster
pub mod layout {
    use super::Rect;

    /// Lap compare panel
    pub const LAP_COMPARE: Rect = Rect::new(10.0, 10.0, 500.0, 250.0);
    /// Lap time panel
    pub const LAP_TIME: Rect = Rect::new(10.0, 270.0, 500.0, 160.0);
    /// Current zone panel
    pub const CURRENT_ZONE: Rect = Rect::new(10.0, 440.0, 600.0, 120.0);
    /// Vertical gauge track
    pub const VERTICAL_TRACK: Rect = Rect::new(550.0, 10.0, 80.0, 330.0);
    /// Horizontal gauge track
    pub const HORIZONTAL_TRACK: Rect = Rect::new(630.0, 340.0, 330.0, 80.0);
    /// Connection status button
    pub const STATUS_BUTTON: Rect = Rect::new(820.0, 490.0, 140.0, 80.0);

    /// Vertical marker size (width, height); y comes from the axis
    pub const VERTICAL_MARKER: (f64, f64) = (130.0, 6.0);
    /// Left edge of the vertical marker
    pub const VERTICAL_MARKER_X: f64 = 525.0;
    /// Horizontal marker size (width, height); x comes from the axis
    pub const HORIZONTAL_MARKER: (f64, f64) = (6.0, 130.0);
    /// Top edge of the horizontal marker
    pub const HORIZONTAL_MARKER_Y: f64 = 315.0;
}
