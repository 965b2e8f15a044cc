//! Viewer link to the relay
//!
//! One link task per connection attempt. Every event it reports carries the
//! generation it was spawned with, so the app can ignore events from a link
//! the user already toggled away from.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use relay_core::wire::{decode_event, encode_command};
use relay_core::{UpdateBatch, ViewerCommand};

/// What a link task reports back
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The WebSocket handshake completed
    Connected {
        /// Link generation
        generation: u64,
    },
    /// A telemetry batch arrived
    Batch {
        /// Link generation
        generation: u64,
        /// Decoded batch
        batch: UpdateBatch,
    },
    /// The relay closed the link or it dropped
    Closed {
        /// Link generation
        generation: u64,
        /// Close reason, if the relay sent one
        reason: String,
    },
    /// The connection attempt failed
    Failed {
        /// Link generation
        generation: u64,
        /// Connect error
        error: String,
    },
}

impl LinkEvent {
    /// Generation of the link that produced this event
    pub fn generation(&self) -> u64 {
        match self {
            Self::Connected { generation }
            | Self::Batch { generation, .. }
            | Self::Closed { generation, .. }
            | Self::Failed { generation, .. } => *generation,
        }
    }
}

/// Owner's handle on a running link task
#[derive(Debug)]
pub struct LinkHandle {
    generation: u64,
    close_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Generation this link was spawned with
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ask the link to send a disconnect command and close
    ///
    /// Does not wait; the task finishes on its own.
    pub fn close(mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Close, then give the task `grace` to deliver the disconnect
    pub async fn close_and_wait(mut self, grace: Duration) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
        }
    }
}

/// Connect to `url` in the background and report on `events`
pub fn spawn_link(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> LinkHandle {
    let (close_tx, close_rx) = oneshot::channel();
    let task = tokio::spawn(drive_link(url, generation, events, close_rx));
    LinkHandle {
        generation,
        close_tx: Some(close_tx),
        task,
    }
}

async fn drive_link(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut close_rx: oneshot::Receiver<()>,
) {
    tracing::debug!(url = %url, generation, "Connecting to relay");

    let connected = tokio::select! {
        connected = tokio_tungstenite::connect_async(url.as_str()) => connected,
        _ = &mut close_rx => {
            tracing::debug!(generation, "Connect abandoned");
            return;
        }
    };

    let socket = match connected {
        Ok((socket, _response)) => socket,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Relay connect failed");
            let _ = events.send(LinkEvent::Failed {
                generation,
                error: e.to_string(),
            });
            return;
        }
    };

    let _ = events.send(LinkEvent::Connected { generation });
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                match encode_command(&ViewerCommand::Disconnect) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::debug!(error = %e, "Disconnect command not delivered");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to encode disconnect"),
                }
                let _ = sink.send(Message::Close(None)).await;
                let _ = events.send(LinkEvent::Closed {
                    generation,
                    reason: "disconnected locally".to_string(),
                });
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match decode_event(&text) {
                    Ok(event) => {
                        let _ = events.send(LinkEvent::Batch {
                            generation,
                            batch: event.to_batch(),
                        });
                    }
                    Err(e) => tracing::debug!(error = %e, "Ignoring undecodable relay message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    let _ = events.send(LinkEvent::Closed { generation, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(LinkEvent::Closed {
                        generation,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    let _ = events.send(LinkEvent::Closed {
                        generation,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            }
        }
    }

    tracing::debug!(generation, "Link task finished");
}
