//! Viewer Wire Protocol
//!
//! JSON text messages exchanged with a viewer over its WebSocket.
//!
//! # Outbound
//!
//! ```json
//! {"type":"telemetry_update","data":"laptime/00:12.3\nlapcompare/+01.2"}
//! ```
//!
//! One event per published batch; `data` holds the batch as newline-joined
//! `<channel>/<value>` lines, exactly what a viewer would parse from the
//! upstream.
//!
//! # Inbound
//!
//! ```json
//! {"type":"disconnect"}
//! {"type":"confirmation","data":"ready"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::UpdateBatch;
use crate::viewer::ViewerSignal;

/// Maximum inbound message size accepted from a viewer (4 KB)
pub const MAX_INBOUND_MESSAGE_SIZE: usize = 4 * 1024;

/// Errors on the viewer wire
#[derive(Debug, Error)]
pub enum WireError {
    /// Message was not valid JSON for the expected type
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Message exceeded the inbound size limit
    #[error("message too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Received size
        size: usize,
        /// Allowed size
        max: usize,
    },
}

/// Relay to viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerEvent {
    /// A batch of updates, encoded as newline-joined lines
    TelemetryUpdate {
        /// Encoded lines
        data: String,
    },
}

impl ViewerEvent {
    /// Wrap a batch for sending
    #[must_use]
    pub fn from_batch(batch: &UpdateBatch) -> Self {
        Self::TelemetryUpdate {
            data: batch.encode(),
        }
    }

    /// Decode the carried batch, dropping lines that do not parse
    #[must_use]
    pub fn to_batch(&self) -> UpdateBatch {
        match self {
            Self::TelemetryUpdate { data } => UpdateBatch::parse_lines(data),
        }
    }
}

/// Viewer to relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerCommand {
    /// Close this connection
    Disconnect,
    /// Acknowledgement from the viewer
    Confirmation {
        /// Free-form payload
        #[serde(default)]
        data: String,
    },
}

impl From<ViewerCommand> for ViewerSignal {
    fn from(command: ViewerCommand) -> Self {
        match command {
            ViewerCommand::Disconnect => Self::DisconnectRequested,
            ViewerCommand::Confirmation { data } => Self::Confirmation(data),
        }
    }
}

/// Serialize an outbound event to a JSON text message
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if serialization fails.
pub fn encode_event(event: &ViewerEvent) -> Result<String, WireError> {
    Ok(serde_json::to_string(event)?)
}

/// Parse an outbound event (viewer side)
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if `text` is not a known event.
pub fn decode_event(text: &str) -> Result<ViewerEvent, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize an inbound command (viewer side)
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if serialization fails.
pub fn encode_command(command: &ViewerCommand) -> Result<String, WireError> {
    Ok(serde_json::to_string(command)?)
}

/// Parse an inbound command, enforcing the size limit
///
/// # Errors
///
/// Returns [`WireError::TooLarge`] or [`WireError::Malformed`].
pub fn decode_command(text: &str) -> Result<ViewerCommand, WireError> {
    if text.len() > MAX_INBOUND_MESSAGE_SIZE {
        return Err(WireError::TooLarge {
            size: text.len(),
            max: MAX_INBOUND_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Map an inbound text message to a viewer signal
///
/// Anything that does not decode is ignored rather than closing the viewer.
#[must_use]
pub fn signal_from_text(text: &str) -> ViewerSignal {
    match decode_command(text) {
        Ok(command) => command.into(),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring viewer message");
            ViewerSignal::Ignored
        }
    }
}
