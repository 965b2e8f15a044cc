//! Viewer Channel
//!
//! Per-connection side of the hub. A `ViewerChannel` is created when a remote
//! viewer connects, registers itself with the [`BroadcastHub`], and hands out
//! batches in publish order until it is closed.
//!
//! Closing happens for one of two reasons: the transport went away, or the
//! viewer explicitly asked to disconnect. Either way the hub entry is removed
//! exactly once, whichever path gets there first. Dropping the channel closes
//! it too, so a viewer task that panics or returns early cannot leave a stale
//! registration behind.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::hub::{BroadcastHub, ViewerHandle, ViewerId, ViewerMetadata};
use crate::record::UpdateBatch;

/// Why a viewer channel was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport closed or errored
    RemoteClosed,
    /// The viewer sent an explicit disconnect request
    DisconnectRequested,
    /// The hub evicted the viewer (queue full or closed)
    Evicted,
    /// The server is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoteClosed => "remote closed",
            Self::DisconnectRequested => "disconnect requested",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Inbound signal from the remote side, already decoded by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerSignal {
    /// Transport closed
    RemoteClosed,
    /// Viewer asked to disconnect
    DisconnectRequested,
    /// Viewer acknowledged something; logged only
    Confirmation(String),
    /// Anything the relay does not act on
    Ignored,
}

/// One registered remote viewer
pub struct ViewerChannel {
    id: ViewerId,
    hub: BroadcastHub,
    rx: mpsc::Receiver<Arc<UpdateBatch>>,
    closed: Option<CloseReason>,
}

impl fmt::Debug for ViewerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerChannel")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ViewerChannel {
    /// Register a new viewer with `hub`
    ///
    /// `capacity` bounds the number of batches queued for this viewer before
    /// the hub evicts it.
    #[must_use]
    pub fn connect(hub: &BroadcastHub, capacity: usize, metadata: ViewerMetadata) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = hub.register(ViewerHandle::new(ViewerId::new(), tx, metadata));
        Self {
            id,
            hub: hub.clone(),
            rx,
            closed: None,
        }
    }

    /// This viewer's identifier
    #[must_use]
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Whether the channel has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Reason the channel was closed, if it was
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    /// Next batch for this viewer
    ///
    /// Returns `None` once the channel is closed or the hub dropped the
    /// viewer. In the latter case the channel records itself as evicted.
    pub async fn recv(&mut self) -> Option<Arc<UpdateBatch>> {
        if self.closed.is_some() {
            return None;
        }
        let batch = self.rx.recv().await;
        if batch.is_none() {
            self.close(CloseReason::Evicted);
        }
        batch
    }

    /// React to an inbound signal
    ///
    /// Returns `true` when the signal closed the channel.
    pub fn handle_signal(&mut self, signal: ViewerSignal) -> bool {
        match signal {
            ViewerSignal::RemoteClosed => self.close(CloseReason::RemoteClosed),
            ViewerSignal::DisconnectRequested => self.close(CloseReason::DisconnectRequested),
            ViewerSignal::Confirmation(data) => {
                tracing::info!(viewer_id = %self.id, data = %data, "Viewer confirmation");
                false
            }
            ViewerSignal::Ignored => false,
        }
    }

    /// Close the channel and unregister from the hub
    ///
    /// Only the first call has an effect; it returns `true`.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.closed.is_some() {
            return false;
        }
        self.closed = Some(reason);
        self.rx.close();
        self.hub.unregister(&self.id);
        tracing::info!(viewer_id = %self.id, reason = %reason, "Viewer channel closed");
        true
    }
}

impl Drop for ViewerChannel {
    fn drop(&mut self) {
        self.close(CloseReason::RemoteClosed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UpdateRecord;
    use pretty_assertions::assert_eq;

    fn batch(zone: &str) -> UpdateBatch {
        std::iter::once(UpdateRecord::current_zone(zone)).collect()
    }

    #[tokio::test]
    async fn test_connect_registers_and_receives() {
        let hub = BroadcastHub::new();
        let mut viewer = ViewerChannel::connect(&hub, 4, ViewerMetadata::default());
        assert!(hub.contains(&viewer.id()));

        hub.publish(batch("Hairpin"));
        assert_eq!(*viewer.recv().await.unwrap(), batch("Hairpin"));
    }

    #[tokio::test]
    async fn test_disconnect_request_unregisters_once() {
        let hub = BroadcastHub::new();
        let mut viewer = ViewerChannel::connect(&hub, 4, ViewerMetadata::default());
        let id = viewer.id();

        assert!(viewer.handle_signal(ViewerSignal::DisconnectRequested));
        assert!(!hub.contains(&id));
        assert_eq!(viewer.close_reason(), Some(CloseReason::DisconnectRequested));

        // The transport closing afterwards is a no-op
        assert!(!viewer.handle_signal(ViewerSignal::RemoteClosed));
        assert_eq!(viewer.close_reason(), Some(CloseReason::DisconnectRequested));
        assert!(viewer.recv().await.is_none());
    }

    #[test]
    fn test_confirmation_keeps_channel_open() {
        let hub = BroadcastHub::new();
        let mut viewer = ViewerChannel::connect(&hub, 4, ViewerMetadata::default());

        assert!(!viewer.handle_signal(ViewerSignal::Confirmation("ready".into())));
        assert!(!viewer.handle_signal(ViewerSignal::Ignored));
        assert!(!viewer.is_closed());
        assert_eq!(hub.count(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let hub = BroadcastHub::new();
        let viewer = ViewerChannel::connect(&hub, 4, ViewerMetadata::default());
        assert_eq!(hub.count(), 1);
        drop(viewer);
        assert_eq!(hub.count(), 0);
    }

    #[tokio::test]
    async fn test_evicted_viewer_sees_end_of_stream() {
        let hub = BroadcastHub::new();
        let mut viewer = ViewerChannel::connect(&hub, 1, ViewerMetadata::default());

        hub.publish(batch("a"));
        let result = hub.publish(batch("b"));
        assert_eq!(result.evicted, vec![viewer.id()]);

        // Already queued batch is still handed out, then the channel ends
        assert_eq!(*viewer.recv().await.unwrap(), batch("a"));
        assert!(viewer.recv().await.is_none());
        assert_eq!(viewer.close_reason(), Some(CloseReason::Evicted));
    }

    #[test]
    fn test_close_does_not_touch_other_viewers() {
        let hub = BroadcastHub::new();
        let mut a = ViewerChannel::connect(&hub, 4, ViewerMetadata::default());
        let b = ViewerChannel::connect(&hub, 4, ViewerMetadata::default());

        a.close(CloseReason::Shutdown);
        assert!(hub.contains(&b.id()));
        assert_eq!(hub.count(), 1);
    }
}
