//! Broadcast Hub - Viewer Fan-Out
//!
//! Tracks every connected viewer and pushes each published batch to all of
//! them.
//!
//! # Architecture
//!
//! ```text
//!                       BroadcastHub
//!                     ┌───────────────────────────────────────┐
//!                     │ HashMap<ViewerId, ViewerHandle>       │
//!                     │   - wrapped in Arc<RwLock<>>          │
//!                     └───────────────┬───────────────────────┘
//!                                     │ publish(batch)
//!              ┌──────────────────────┼──────────────────────┐
//!              │                      │                      │
//!       ┌──────▼──────┐       ┌───────▼──────┐       ┌───────▼──────┐
//!       │  viewer-1   │       │  viewer-2    │       │  viewer-3    │
//!       │ mpsc queue  │       │ mpsc queue   │       │ mpsc queue   │
//!       └─────────────┘       └──────────────┘       └──────────────┘
//! ```
//!
//! # Delivery Rules
//!
//! - Publishing iterates under the read lock; register/unregister take the
//!   write lock, so a viewer is never half-present during a publish.
//! - Delivery uses `try_send` into each viewer's bounded queue. A viewer whose
//!   queue is full or closed is evicted after the iteration, without touching
//!   anyone else's delivery.
//! - Each queue is FIFO, and batches come from a single reader task, so every
//!   viewer sees batches in publish order.
//! - New viewers get no history.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::reader::BatchSink;
use crate::record::UpdateBatch;

/// Default capacity of each viewer's outbound queue
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Unique identifier for a viewer connection
///
/// Stable for the lifetime of the connection and never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ViewerId(u64);

impl ViewerId {
    /// Allocate a new unique viewer ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// Optional metadata about a viewer connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewerMetadata {
    /// Remote address of the viewer
    pub peer_addr: Option<SocketAddr>,
    /// User agent reported during the upgrade
    pub user_agent: Option<String>,
}

/// Outcome of a single fire-and-forget send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the viewer
    Queued,
    /// The viewer's queue is full
    Lagging,
    /// The viewer's receiving side is gone
    Closed,
}

/// Hub-side handle to a connected viewer
#[derive(Debug)]
pub struct ViewerHandle {
    /// Unique viewer identifier
    pub id: ViewerId,
    /// Queue of batches for this viewer
    pub tx: mpsc::Sender<Arc<UpdateBatch>>,
    /// When the viewer connected
    pub connected_at: std::time::Instant,
    /// Connection metadata
    pub metadata: ViewerMetadata,
}

impl ViewerHandle {
    /// Create a new viewer handle
    #[must_use]
    pub fn new(id: ViewerId, tx: mpsc::Sender<Arc<UpdateBatch>>, metadata: ViewerMetadata) -> Self {
        Self {
            id,
            tx,
            connected_at: std::time::Instant::now(),
            metadata,
        }
    }

    /// Queue a batch without waiting
    pub fn send(&self, batch: Arc<UpdateBatch>) -> SendOutcome {
        match self.tx.try_send(batch) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Lagging,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Check if the viewer's receiving side is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Get the connection uptime in seconds
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.connected_at.elapsed().as_secs()
    }
}

/// Result of a publish operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of viewers the batch was queued for
    pub delivered: usize,
    /// Viewers evicted because their queue was full or closed
    pub evicted: Vec<ViewerId>,
}

impl BroadcastResult {
    /// Check if every registered viewer got the batch
    #[must_use]
    pub fn all_delivered(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Summary of a single viewer for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ViewerSummary {
    /// Viewer identifier
    pub id: ViewerId,
    /// Seconds since the viewer connected
    pub uptime_secs: u64,
    /// Batches waiting in the viewer's queue
    pub queued: usize,
    /// Connection metadata
    pub metadata: ViewerMetadata,
}

/// Summary of the hub for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct HubSummary {
    /// Number of connected viewers
    pub viewer_count: usize,
    /// Batches published since start
    pub batches_published: u64,
    /// Viewers evicted for lagging or closing since start
    pub viewers_evicted: u64,
    /// Per-viewer details
    pub viewers: Vec<ViewerSummary>,
}

#[derive(Debug, Default)]
struct HubCounters {
    published: AtomicU64,
    evicted: AtomicU64,
}

/// Registry of connected viewers with fan-out publish
///
/// Cheap to clone; clones share the same viewer set.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    /// Inner map of viewer ID to handle
    inner: Arc<RwLock<HashMap<ViewerId, ViewerHandle>>>,
    counters: Arc<HubCounters>,
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("viewers", &self.count())
            .finish_non_exhaustive()
    }
}

impl BroadcastHub {
    /// Create a new empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer
    ///
    /// Returns the viewer's ID.
    pub fn register(&self, handle: ViewerHandle) -> ViewerId {
        let id = handle.id;
        let mut inner = self.inner.write();
        inner.insert(id, handle);
        tracing::info!(
            viewer_id = %id,
            viewers = inner.len(),
            "Viewer registered"
        );
        id
    }

    /// Unregister a viewer
    ///
    /// Idempotent: returns the handle the first time and `None` afterwards.
    pub fn unregister(&self, id: &ViewerId) -> Option<ViewerHandle> {
        let mut inner = self.inner.write();
        let handle = inner.remove(id);
        if handle.is_some() {
            tracing::info!(
                viewer_id = %id,
                viewers = inner.len(),
                "Viewer unregistered"
            );
        }
        handle
    }

    /// Get the number of connected viewers
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if a viewer is registered
    #[must_use]
    pub fn contains(&self, id: &ViewerId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Get the IDs of all connected viewers
    #[must_use]
    pub fn viewer_ids(&self) -> Vec<ViewerId> {
        self.inner.read().keys().copied().collect()
    }

    /// Deliver a batch to every registered viewer
    ///
    /// Empty batches are not fanned out. Viewers that cannot take the batch
    /// are evicted once the iteration is done.
    pub fn publish(&self, batch: UpdateBatch) -> BroadcastResult {
        if batch.is_empty() {
            return BroadcastResult::default();
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let batch = Arc::new(batch);
        let mut result = BroadcastResult::default();

        {
            let inner = self.inner.read();
            for (id, handle) in inner.iter() {
                match handle.send(Arc::clone(&batch)) {
                    SendOutcome::Queued => result.delivered += 1,
                    SendOutcome::Lagging => {
                        tracing::warn!(viewer_id = %id, "Viewer queue full, evicting");
                        result.evicted.push(*id);
                    }
                    SendOutcome::Closed => {
                        tracing::debug!(viewer_id = %id, "Viewer queue closed, evicting");
                        result.evicted.push(*id);
                    }
                }
            }
        }

        for id in &result.evicted {
            if self.unregister(id).is_some() {
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::trace!(
            records = batch.len(),
            delivered = result.delivered,
            evicted = result.evicted.len(),
            "Batch published"
        );
        result
    }

    /// Remove viewers whose receiving side has gone away
    ///
    /// Returns the number of viewers removed.
    pub fn cleanup_disconnected(&self) -> usize {
        let stale: Vec<ViewerId> = self
            .inner
            .read()
            .iter()
            .filter(|(_, h)| !h.is_connected())
            .map(|(id, _)| *id)
            .collect();

        stale.iter().filter(|id| self.unregister(id).is_some()).count()
    }

    /// Get a summary of all connected viewers
    #[must_use]
    pub fn summary(&self) -> HubSummary {
        let inner = self.inner.read();
        let mut viewers: Vec<ViewerSummary> = inner
            .values()
            .map(|h| ViewerSummary {
                id: h.id,
                uptime_secs: h.uptime_secs(),
                queued: h.tx.max_capacity() - h.tx.capacity(),
                metadata: h.metadata.clone(),
            })
            .collect();
        viewers.sort_by_key(|v| v.id);

        HubSummary {
            viewer_count: inner.len(),
            batches_published: self.counters.published.load(Ordering::Relaxed),
            viewers_evicted: self.counters.evicted.load(Ordering::Relaxed),
            viewers,
        }
    }
}

impl BatchSink for BroadcastHub {
    fn deliver(&self, batch: UpdateBatch) {
        let _ = self.publish(batch);
    }
}
