//! Client Render Loop - Surface-Agnostic Cluster State
//!
//! Everything a viewer needs to turn incoming batches into a steady picture,
//! independent of how that picture is drawn. The browser dashboard and the
//! terminal cluster both follow the same rules:
//!
//! - Records are applied in arrival order.
//! - Text channels replace their slot immediately.
//! - Axis channels move their marker over [`AXIS_TRANSITION`]. A new value
//!   retargets the running move from the current position.
//! - Batches only count while connected.
//!
//! # Connection State Machine
//!
//! ```text
//!                  begin_connect            on_connected
//!   Disconnected ───────────────▶ Connecting ────────────▶ Connected
//!        ▲                            │                       │
//!        └──── toggle / remote close ─┴───────────────────────┘
//! ```
//!
//! The toggle is local: it tells the surface to close its link and flips the
//! indicator at once. Nothing travels back to the relay except the link's
//! own close.

mod connection;
mod display;
pub mod geometry;
mod timing;
mod transition;

pub use connection::{ConnectionState, StatusIndicator};
pub use display::{
    DisplaySnapshot, DisplayState, INITIAL_CURRENT_ZONE, INITIAL_LAP_COMPARE, INITIAL_LAP_TIME,
};
pub use geometry::{AxisDirection, AxisGeometry};
pub use timing::EasingFunction;
pub use transition::{AxisSlot, AxisTransition, AXIS_TRANSITION};

use std::time::Instant;

use serde::Serialize;

use crate::record::UpdateBatch;

/// What happened to an incoming batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Applied; carries the number of records
    Applied(usize),
    /// Not connected, ignored
    Dropped,
}

/// What the surface must do after a toggle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleAction {
    /// Close the active (or pending) link
    Disconnect,
    /// Open a new link
    Reconnect,
}

/// Counters kept by the render loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    /// Batches applied
    pub batches_applied: u64,
    /// Batches ignored while not connected
    pub batches_dropped: u64,
    /// Records applied
    pub records_applied: u64,
    /// Times the link was closed from this side
    pub local_disconnects: u64,
    /// Times the link was closed by the other side
    pub remote_closes: u64,
}

/// Everything needed to draw one frame
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DashboardFrame {
    /// Slot values
    #[serde(flatten)]
    pub display: DisplaySnapshot,
    /// Status button colour
    pub status: StatusIndicator,
    /// Connection state
    pub connection: ConnectionState,
    /// Whether a marker is still moving
    pub animating: bool,
}

/// Viewer side state machine
#[derive(Clone, Debug, Default)]
pub struct RenderLoop {
    display: DisplayState,
    connection: ConnectionState,
    stats: RenderStats,
}

impl RenderLoop {
    /// Fresh loop: initial display, disconnected
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connection state
    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Status button colour
    #[must_use]
    pub fn status(&self) -> StatusIndicator {
        StatusIndicator::for_state(self.connection)
    }

    /// Current display state
    #[must_use]
    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// A link attempt was started
    ///
    /// Returns `false` (and changes nothing) unless currently disconnected.
    pub fn begin_connect(&mut self) -> bool {
        if self.connection != ConnectionState::Disconnected {
            return false;
        }
        self.connection = ConnectionState::Connecting;
        true
    }

    /// The pending link came up
    ///
    /// Only honoured while connecting; a late success after the user toggled
    /// away is ignored.
    pub fn on_connected(&mut self) -> bool {
        if self.connection != ConnectionState::Connecting {
            tracing::debug!(state = %self.connection, "Ignoring stale connect");
            return false;
        }
        self.connection = ConnectionState::Connected;
        tracing::info!("Cluster connected");
        true
    }

    /// Apply a batch at `now` if connected
    pub fn on_batch(&mut self, batch: &UpdateBatch, now: Instant) -> BatchOutcome {
        if !self.connection.accepts_batches() {
            self.stats.batches_dropped += 1;
            return BatchOutcome::Dropped;
        }
        let applied = self.display.apply_batch(batch, now);
        self.stats.batches_applied += 1;
        self.stats.records_applied += applied as u64;
        BatchOutcome::Applied(applied)
    }

    /// The link was closed or failed from the other side
    ///
    /// Returns `true` if this changed the state.
    pub fn on_remote_close(&mut self) -> bool {
        if self.connection == ConnectionState::Disconnected {
            return false;
        }
        self.connection = ConnectionState::Disconnected;
        self.stats.remote_closes += 1;
        tracing::info!("Cluster link closed remotely");
        true
    }

    /// The user pressed the status button
    ///
    /// While connected (or connecting) this disconnects locally right away
    /// and asks the surface to close its link. While disconnected it starts a
    /// new attempt.
    pub fn toggle(&mut self) -> ToggleAction {
        match self.connection {
            ConnectionState::Connected | ConnectionState::Connecting => {
                self.connection = ConnectionState::Disconnected;
                self.stats.local_disconnects += 1;
                tracing::info!("Cluster disconnected by user");
                ToggleAction::Disconnect
            }
            ConnectionState::Disconnected => {
                self.connection = ConnectionState::Connecting;
                ToggleAction::Reconnect
            }
        }
    }

    /// Retire finished transitions
    pub fn tick(&mut self, now: Instant) {
        self.display.settle(now);
    }

    /// Drawable frame at `now`
    #[must_use]
    pub fn frame(&self, now: Instant) -> DashboardFrame {
        DashboardFrame {
            display: self.display.snapshot(now),
            status: self.status(),
            connection: self.connection,
            animating: self.display.is_animating(now),
        }
    }
}
