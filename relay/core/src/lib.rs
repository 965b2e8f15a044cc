//! Relay Core - Live Telemetry Distribution
//!
//! This crate carries the telemetry pipeline of the relay, independent of
//! any HTTP server or drawing surface: the upstream reader, the fan-out hub,
//! the per-viewer channel, the viewer wire protocol and the render loop that
//! every viewer surface runs.
//!
//! # Architecture
//!
//! ```text
//!   upstream file / named pipe
//!              │ raw deliveries
//! ┌────────────▼───────────────────────────────────────────────┐
//! │ StreamReader ── LineFramer ── UpdateBatch                  │
//! │      │                                                     │
//! │      │ BatchSink::deliver                                  │
//! │ ┌────▼─────────────────────────────────────────────────┐   │
//! │ │ BroadcastHub (RwLock<HashMap<ViewerId, ViewerHandle>>)│   │
//! │ └────┬──────────────────┬──────────────────┬───────────┘   │
//! │      │ bounded queue    │                  │               │
//! │ ┌────▼─────────┐ ┌──────▼───────┐ ┌────────▼─────┐         │
//! │ │ViewerChannel │ │ViewerChannel │ │ViewerChannel │         │
//! │ └────┬─────────┘ └──────┬───────┘ └────────┬─────┘         │
//! └──────┼──────────────────┼──────────────────┼───────────────┘
//!        │ ViewerEvent      │                  │
//!   ┌────▼─────┐       ┌────▼─────┐       ┌────▼─────┐
//!   │RenderLoop│       │RenderLoop│       │RenderLoop│   (viewer side)
//!   └──────────┘       └──────────┘       └──────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`record`]: Channels, update records and batches, line encoding
//! - [`framing`]: Partial-line buffering of raw deliveries
//! - [`reader`]: Upstream lifecycle, reopen policy, batch sink
//! - [`hub`]: Viewer registry and fan-out publish
//! - [`viewer`]: Per-viewer channel and close handling
//! - [`wire`]: JSON messages exchanged with viewers
//! - [`render`]: Client display state, axis transitions, connection toggle
//! - [`config`]: TOML, environment and CLI configuration
//!
//! # No Server or UI Dependencies
//!
//! Nothing here depends on axum, ratatui or crossterm. The daemon and the
//! terminal cluster wrap these types in their own transports.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod framing;
pub mod hub;
pub mod reader;
pub mod record;
pub mod render;
pub mod viewer;
pub mod wire;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig,
};
pub use framing::{FramerStats, LineFramer, MAX_LINE_LENGTH};
pub use hub::{
    BroadcastHub, BroadcastResult, HubSummary, ViewerHandle, ViewerId, ViewerMetadata,
    DEFAULT_OUTBOUND_CAPACITY,
};
pub use reader::{
    BatchSink, FileSource, ReaderConfig, ReaderError, ReopenPolicy, StreamReader, StreamState,
    StreamStatus, UpstreamSource, UpstreamStream,
};
pub use record::{Channel, ParseError, UpdateBatch, UpdateRecord, UpdateValue};
pub use render::{
    BatchOutcome, ConnectionState, DashboardFrame, RenderLoop, StatusIndicator, ToggleAction,
};
pub use viewer::{CloseReason, ViewerChannel, ViewerSignal};
pub use wire::{ViewerCommand, ViewerEvent, WireError};
