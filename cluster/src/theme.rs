//! Theme and Colors
//!
//! The cluster palette: dark panels behind white text, amber tracks for the
//! acceleration markers, and a green/red status button.

use ratatui::style::Color;

use relay_core::StatusIndicator;

// ============================================================================
// Panels
// ============================================================================

/// Lap comparison panel - dark teal
pub const LAP_COMPARE_PANEL: Color = Color::Rgb(0x00, 0x44, 0x44);

/// Lap time panel - dark green
pub const LAP_TIME_PANEL: Color = Color::Rgb(0x00, 0x66, 0x22);

/// Current zone panel - navy
pub const CURRENT_ZONE_PANEL: Color = Color::Rgb(0x00, 0x00, 0x55);

/// Panel text
pub const PANEL_TEXT: Color = Color::Rgb(0xFF, 0xFF, 0xFF);

// ============================================================================
// Axis Tracks
// ============================================================================

/// Track behind each acceleration marker
pub const TRACK: Color = Color::Rgb(0x66, 0x44, 0x00);

/// The moving marker
pub const MARKER: Color = Color::Rgb(0xFF, 0xFF, 0xFF);

// ============================================================================
// Chrome
// ============================================================================

/// Frame border and hints
pub const DIM_GRAY: Color = Color::Rgb(100, 100, 100);

/// Link errors
pub const ERROR_RED: Color = Color::Rgb(255, 80, 80);

/// Status button color for an indicator
pub fn status_color(indicator: StatusIndicator) -> Color {
    let (r, g, b) = indicator.rgb();
    Color::Rgb(r, g, b)
}
