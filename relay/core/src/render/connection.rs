//! Client connection state and status indicator

use std::fmt;

use serde::Serialize;

/// Client side view of the viewer connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection; batches are dropped
    #[default]
    Disconnected,
    /// Connection attempt in flight; batches are dropped
    Connecting,
    /// Connected; batches are applied
    Connected,
}

impl ConnectionState {
    /// Whether batches are applied in this state
    #[must_use]
    pub fn accepts_batches(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Colour of the status button
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
    /// Green
    Connected,
    /// Red
    Disconnected,
}

impl StatusIndicator {
    /// Indicator for a connection state; a pending attempt shows red
    #[must_use]
    pub fn for_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Disconnected | ConnectionState::Connecting => Self::Disconnected,
        }
    }

    /// RGB components
    #[must_use]
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Self::Connected => (0x00, 0xBB, 0x00),
            Self::Disconnected => (0xBB, 0x00, 0x00),
        }
    }

    /// CSS colour
    #[must_use]
    pub fn css(self) -> &'static str {
        match self {
            Self::Connected => "#0B0",
            Self::Disconnected => "#B00",
        }
    }
}
