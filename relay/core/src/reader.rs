//! Stream Reader
//!
//! Owns the single upstream byte source, frames it into update batches and
//! hands every batch to a [`BatchSink`]. The reader is the only component that
//! touches raw upstream bytes.
//!
//! # Lifecycle
//!
//! ```text
//!   Closed ──open──▶ Open ──EOF / read error──▶ Ended ──reopen──▶ Open ...
//! ```
//!
//! The initial open happens in [`StreamReader::open`]; failing there is a
//! fatal startup error. After that, end-of-stream is routine (a named pipe
//! ends every time its writer goes away): the partial line is discarded and
//! the source is reopened under the [`ReopenPolicy`].
//!
//! A generation that ends without delivering a single byte counts against
//! the policy the same way a failed open does, so a source that opens and
//! ends straight away (an empty file, a writer that connects and leaves) is
//! retried with backoff instead of in a tight loop.
//!
//! The reader never waits on viewers. [`BatchSink::deliver`] must not block.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf};
use tokio::sync::{mpsc, watch};

use crate::framing::{LineFramer, MAX_LINE_LENGTH};
use crate::record::UpdateBatch;

/// Default size of a single upstream read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Errors surfaced by the stream reader
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The source could not be opened at startup
    #[error("failed to open upstream source {source_name}: {error}")]
    Open {
        /// Human readable source description
        source_name: String,
        /// Underlying IO error
        #[source]
        error: io::Error,
    },

    /// Reopening after end-of-stream failed more times than allowed
    #[error("gave up reopening upstream source {source_name} after {attempts} attempts: {error}")]
    ReopenExhausted {
        /// Human readable source description
        source_name: String,
        /// Attempts made
        attempts: u32,
        /// Last IO error
        #[source]
        error: io::Error,
    },
}

// ============================================================================
// Upstream Source
// ============================================================================

/// Boxed upstream byte stream
pub type UpstreamStream = Box<dyn AsyncRead + Send + Unpin>;

/// Something the reader can (re)open to get a byte stream
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Open a fresh stream
    async fn open(&self) -> io::Result<UpstreamStream>;

    /// Description used in logs and errors
    fn describe(&self) -> String;
}

/// Upstream source backed by a filesystem path (named pipe or regular file)
///
/// A named pipe is reopened from scratch every time its writer goes away. A
/// regular file is followed instead: each reopen resumes at the byte offset
/// the previous handle reached, so appended lines arrive once and nothing is
/// replayed. A file that shrank is read again from the start. Any other kind
/// of path (directory, socket, device) is refused.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    /// Bytes of a regular file already handed to the reader
    consumed: Arc<AtomicU64>,
}

impl FileSource {
    /// Create a source for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            consumed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The configured path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What kind of filesystem object the upstream path names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UpstreamKind {
    Pipe,
    File,
}

impl UpstreamKind {
    fn classify(file_type: &std::fs::FileType) -> Option<Self> {
        if file_type.is_file() {
            return Some(Self::File);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_fifo() {
                return Some(Self::Pipe);
            }
        }
        None
    }
}

#[async_trait]
impl UpstreamSource for FileSource {
    async fn open(&self) -> io::Result<UpstreamStream> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        let kind = UpstreamKind::classify(&metadata.file_type()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a named pipe or regular file",
            )
        })?;

        // Opening a FIFO blocks until a writer shows up; tokio runs it off the
        // async workers.
        let mut file = tokio::fs::File::open(&self.path).await?;
        if kind == UpstreamKind::Pipe {
            return Ok(Box::new(file));
        }

        let len = file.metadata().await?.len();
        let mut offset = self.consumed.load(Ordering::Acquire);
        if offset > len {
            tracing::info!(
                path = %self.path.display(),
                offset,
                len,
                "Upstream file shrank, reading from the start"
            );
            offset = 0;
        }
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        self.consumed.store(offset, Ordering::Release);

        Ok(Box::new(FollowedFile {
            file,
            consumed: Arc::clone(&self.consumed),
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Regular file handle that records how far it has been read
struct FollowedFile {
    file: tokio::fs::File,
    consumed: Arc<AtomicU64>,
}

impl AsyncRead for FollowedFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.file).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &polled {
            let read = (buf.filled().len() - before) as u64;
            self.consumed.fetch_add(read, Ordering::AcqRel);
        }
        polled
    }
}

// ============================================================================
// Batch Sink
// ============================================================================

/// Receiver of parsed batches
///
/// This is the only interface through which the reader reaches the rest of
/// the system.
pub trait BatchSink: Send + Sync {
    /// Hand over one batch. Must not block.
    fn deliver(&self, batch: UpdateBatch);
}

impl<T: BatchSink + ?Sized> BatchSink for Arc<T> {
    fn deliver(&self, batch: UpdateBatch) {
        (**self).deliver(batch);
    }
}

impl BatchSink for mpsc::UnboundedSender<UpdateBatch> {
    fn deliver(&self, batch: UpdateBatch) {
        if self.send(batch).is_err() {
            tracing::debug!("Batch receiver dropped");
        }
    }
}

// ============================================================================
// Reopen Policy
// ============================================================================

/// Retry cadence for reopening the upstream after it ends
///
/// The first attempt after end-of-stream is immediate. Each further attempt
/// waits `initial_delay * multiplier^(n-1)`, capped at `max_delay`.
#[derive(Clone, Debug, PartialEq)]
pub struct ReopenPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up (0 = never give up)
    pub max_attempts: u32,
}

impl Default for ReopenPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReopenPolicy {
    /// Policy that retries immediately without ever waiting
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: 0,
        }
    }

    /// Delay before attempt number `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    #[must_use]
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts == 0 || failures < self.max_attempts
    }
}

// ============================================================================
// Stream Status
// ============================================================================

/// Lifecycle state of the upstream stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Not opened yet, or stopped
    #[default]
    Closed,
    /// Reading from an open handle
    Open,
    /// The handle ended; reopening
    Ended,
}

/// Observable snapshot of the reader
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamStatus {
    /// Current lifecycle state
    pub state: StreamState,
    /// How many times the source has been opened
    pub generation: u64,
    /// Raw deliveries read
    pub deliveries: u64,
    /// Records parsed
    pub records: u64,
    /// Lines dropped as malformed
    pub dropped_lines: u64,
    /// Bytes of partial lines lost at end-of-stream
    pub discarded_bytes: u64,
}

/// Tunables for the reader
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// Size of a single read
    pub read_buffer_size: usize,
    /// Longest partial line kept
    pub max_line_length: usize,
    /// Reopen cadence
    pub reopen: ReopenPolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            reopen: ReopenPolicy::default(),
        }
    }
}

// ============================================================================
// Stream Reader
// ============================================================================

/// Single owner of the upstream handle and its partial-line buffer
pub struct StreamReader<S: UpstreamSource> {
    source: S,
    config: ReaderConfig,
    framer: LineFramer,
    handle: Option<UpstreamStream>,
    status: watch::Sender<StreamStatus>,
    /// Bytes read from the current handle
    generation_bytes: u64,
    /// Consecutive generations that ended without any bytes
    idle_generations: u32,
}

impl<S: UpstreamSource> StreamReader<S> {
    /// Open the source for the first time
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Open`] if the source cannot be opened. This is
    /// a startup failure and is not retried.
    pub async fn open(source: S, config: ReaderConfig) -> Result<Self, ReaderError> {
        let (status, _) = watch::channel(StreamStatus::default());
        Self::open_reporting(source, config, status).await
    }

    /// Open the source for the first time, publishing status on `status`
    ///
    /// Lets a caller hand out status receivers before the (possibly slow)
    /// first open completes.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Open`] if the source cannot be opened.
    pub async fn open_reporting(
        source: S,
        config: ReaderConfig,
        status: watch::Sender<StreamStatus>,
    ) -> Result<Self, ReaderError> {
        let handle = source.open().await.map_err(|error| ReaderError::Open {
            source_name: source.describe(),
            error,
        })?;

        status.send_modify(|s| {
            s.state = StreamState::Open;
            s.generation = 1;
        });

        tracing::info!(source = %source.describe(), "Upstream opened");

        Ok(Self {
            framer: LineFramer::with_max_line_length(config.max_line_length),
            source,
            config,
            handle: Some(handle),
            status,
            generation_bytes: 0,
            idle_generations: 0,
        })
    }

    /// Subscribe to status updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// Read, frame and deliver until shutdown
    ///
    /// Returns `Ok(())` when `shutdown` flips to `true` (or its sender is
    /// dropped).
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::ReopenExhausted`] when the reopen policy gives
    /// up. Nothing else is fatal once the stream has been opened.
    pub async fn run<K: BatchSink + ?Sized>(
        mut self,
        sink: &K,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReaderError> {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            if self.handle.is_none() {
                let reopened = tokio::select! {
                    reopened = reopen_source(
                        &self.source,
                        &self.config.reopen,
                        self.idle_generations,
                        &self.status,
                    ) => reopened,
                    _ = wait_for_shutdown(&mut shutdown) => break,
                };
                let reopened = match reopened {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.status.send_modify(|s| s.state = StreamState::Closed);
                        tracing::error!(error = %e, "Stream reader giving up");
                        return Err(e);
                    }
                };
                self.handle = Some(reopened);
            }
            let Some(mut handle) = self.handle.take() else {
                continue;
            };

            tokio::select! {
                read = handle.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!(
                            source = %self.source.describe(),
                            bytes = self.generation_bytes,
                            "Upstream ended"
                        );
                        self.end_of_stream();
                    }
                    Ok(n) => {
                        self.generation_bytes += n as u64;
                        let batch = self.framer.push(&buf[..n]);
                        self.record_delivery(&batch);
                        sink.deliver(batch);
                        self.handle = Some(handle);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream read failed, treating as end of stream");
                        self.end_of_stream();
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.framer.reset();
        self.status.send_modify(|s| s.state = StreamState::Closed);
        tracing::info!("Stream reader stopped");
        Ok(())
    }

    fn record_delivery(&self, batch: &UpdateBatch) {
        let stats = self.framer.stats();
        self.status.send_modify(|s| {
            s.deliveries += 1;
            s.records = stats.records;
            s.dropped_lines = stats.dropped;
        });
        tracing::trace!(records = batch.len(), "Upstream delivery framed");
    }

    fn end_of_stream(&mut self) {
        if self.generation_bytes == 0 {
            self.idle_generations = self.idle_generations.saturating_add(1);
        } else {
            self.idle_generations = 0;
        }
        self.generation_bytes = 0;

        let discarded = self.framer.reset();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarding partial line at end of stream");
        }
        self.status.send_modify(|s| {
            s.state = StreamState::Ended;
            s.discarded_bytes += discarded as u64;
        });
    }
}

/// Reopen `source` under `policy`, updating `status` on success
///
/// `idle` consecutive empty generations push the first delay along the
/// backoff curve. Only failed opens count towards `max_attempts`.
async fn reopen_source<S: UpstreamSource>(
    source: &S,
    policy: &ReopenPolicy,
    idle: u32,
    status: &watch::Sender<StreamStatus>,
) -> Result<UpstreamStream, ReaderError> {
    let mut failures: u32 = 0;

    loop {
        let delay = policy.delay_for(idle.saturating_add(failures));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match source.open().await {
            Ok(handle) => {
                status.send_modify(|s| {
                    s.state = StreamState::Open;
                    s.generation += 1;
                });
                tracing::info!(
                    source = %source.describe(),
                    attempts = failures + 1,
                    "Upstream reopened"
                );
                return Ok(handle);
            }
            Err(error) => {
                failures += 1;
                tracing::warn!(
                    source = %source.describe(),
                    attempt = failures,
                    error = %error,
                    "Failed to reopen upstream"
                );
                if !policy.allows(failures) {
                    return Err(ReaderError::ReopenExhausted {
                        source_name: source.describe(),
                        attempts: failures,
                        error,
                    });
                }
            }
        }
    }
}

/// Resolves once shutdown is requested or the signal sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_policy_first_attempt_is_immediate() {
        let policy = ReopenPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
    }

    #[test]
    fn test_reopen_policy_is_capped() {
        let policy = ReopenPolicy::default();
        assert_eq!(policy.delay_for(30), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_reopen_policy_attempt_limit() {
        let unlimited = ReopenPolicy::default();
        assert!(unlimited.allows(1_000_000));

        let limited = ReopenPolicy {
            max_attempts: 3,
            ..ReopenPolicy::default()
        };
        assert!(limited.allows(2));
        assert!(!limited.allows(3));
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let policy = ReopenPolicy::immediate();
        assert_eq!(policy.delay_for(7), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.fifo"));

        let result = StreamReader::open(source, ReaderConfig::default()).await;
        assert!(matches!(result, Err(ReaderError::Open { .. })));
    }

    #[tokio::test]
    async fn test_directory_is_refused_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path());

        match StreamReader::open(source, ReaderConfig::default()).await {
            Err(ReaderError::Open { error, .. }) => {
                assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
            }
            other => panic!("expected open error, got {:?}", other.err()),
        }
    }

    /// Run a reader over `source` for `window`, then stop it
    async fn run_for(source: FileSource, window: Duration) -> (StreamStatus, Vec<UpdateBatch>) {
        let reader = StreamReader::open(source, ReaderConfig::default())
            .await
            .unwrap();
        let status = reader.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { reader.run(&tx, shutdown_rx).await });

        tokio::time::sleep(window).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            if !batch.is_empty() {
                batches.push(batch);
            }
        }
        let status = status.borrow().clone();
        (status, batches)
    }

    async fn next_non_empty(rx: &mut mpsc::UnboundedReceiver<UpdateBatch>) -> UpdateBatch {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let batch = rx.recv().await.expect("reader stopped");
                if !batch.is_empty() {
                    return batch;
                }
            }
        })
        .await
        .expect("timed out waiting for batch")
    }

    #[tokio::test]
    async fn test_empty_file_reopens_with_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");
        std::fs::write(&path, "").unwrap();

        let (status, batches) = run_for(FileSource::new(path), Duration::from_millis(300)).await;

        // 0ms, 50ms, 150ms, 350ms... rather than thousands of opens
        assert!(batches.is_empty());
        assert!(
            (2..=5).contains(&status.generation),
            "generation {}",
            status.generation
        );
    }

    #[tokio::test]
    async fn test_regular_file_is_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");
        std::fs::write(&path, "laptime/00:12.3\n").unwrap();

        let (status, batches) = run_for(FileSource::new(path), Duration::from_millis(300)).await;

        assert_eq!(batches, vec![UpdateBatch::parse_lines("laptime/00:12.3")]);
        assert!(status.generation <= 6, "generation {}", status.generation);
    }

    #[tokio::test]
    async fn test_regular_file_is_followed_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");
        std::fs::write(&path, "laptime/00:12.3\n").unwrap();

        let reader = StreamReader::open(FileSource::new(path.clone()), ReaderConfig::default())
            .await
            .unwrap();
        let status = reader.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { reader.run(&tx, shutdown_rx).await });

        assert_eq!(
            next_non_empty(&mut rx).await,
            UpdateBatch::parse_lines("laptime/00:12.3")
        );

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, b"currentzone/Ascari\n").unwrap();
        drop(file);
        assert_eq!(
            next_non_empty(&mut rx).await,
            UpdateBatch::parse_lines("currentzone/Ascari")
        );

        // Truncated and rewritten: read from the start again
        std::fs::write(&path, "accelx/0.5\n").unwrap();
        assert_eq!(
            next_non_empty(&mut rx).await,
            UpdateBatch::parse_lines("accelx/0.5")
        );

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        while let Ok(batch) = rx.try_recv() {
            assert!(batch.is_empty(), "replayed {batch:?}");
        }
        assert!(status.borrow().generation >= 3);
    }

    #[tokio::test]
    async fn test_unbounded_sender_is_a_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.deliver(UpdateBatch::new());
        assert!(rx.recv().await.unwrap().is_empty());
    }
}
