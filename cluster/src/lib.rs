//! Cluster TUI - Terminal instrument cluster for the telemetry relay
//!
//! Connects to a relay's viewer WebSocket and draws the same dashboard the
//! browser page shows: three text panels, two animated acceleration markers
//! and a status button that toggles the connection.
//!
//! # Architecture
//!
//! - **App**: event loop, toggle handling, link generations
//! - **Link**: one WebSocket task per connection attempt
//! - **Dashboard**: reference geometry drawn on a ratatui canvas
//! - **Theme**: colors

pub mod app;
pub mod dashboard;
pub mod link;
pub mod theme;

pub use app::App;
