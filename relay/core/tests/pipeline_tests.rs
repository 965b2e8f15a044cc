//! Integration tests for the reader -> hub -> viewer pipeline
//!
//! These tests drive a real `StreamReader` against in-memory upstreams:
//! - Scripted deliveries (`tokio_test` mock IO), one read per chunk
//! - A pipe-like source whose "writers" the test connects and drops, so
//!   end-of-stream and reopen happen exactly when the test says so

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};

use relay_core::{
    BroadcastHub, ReaderConfig, ReaderError, ReopenPolicy, StreamReader, StreamState,
    UpdateBatch, UpdateRecord, UpstreamSource, UpstreamStream, ViewerChannel, ViewerMetadata,
};

// =============================================================================
// Test Sources
// =============================================================================

/// Hands out one scripted mock per open, then fails
struct ScriptedSource {
    scripts: Mutex<VecDeque<tokio_test::io::Mock>>,
    opens: AtomicUsize,
}

impl ScriptedSource {
    fn new(scripts: Vec<tokio_test::io::Mock>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opens: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UpstreamSource for ScriptedSource {
    async fn open(&self) -> io::Result<UpstreamStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().pop_front() {
            Some(mock) => Ok(Box::new(mock)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "script exhausted")),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Behaves like a named pipe: open waits until a writer connects
struct PipeSource {
    ends: tokio::sync::Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
}

struct PipeWriters {
    tx: mpsc::UnboundedSender<DuplexStream>,
}

impl PipeWriters {
    fn connect(&self) -> DuplexStream {
        let (writer, reader) = tokio::io::duplex(1024);
        self.tx.send(reader).unwrap();
        writer
    }
}

fn pipe() -> (PipeSource, PipeWriters) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PipeSource {
            ends: tokio::sync::Mutex::new(rx),
        },
        PipeWriters { tx },
    )
}

#[async_trait]
impl UpstreamSource for PipeSource {
    async fn open(&self) -> io::Result<UpstreamStream> {
        match self.ends.lock().await.recv().await {
            Some(end) => Ok(Box::new(end)),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no more writers")),
        }
    }

    fn describe(&self) -> String {
        "pipe".to_string()
    }
}

fn single_attempt() -> ReaderConfig {
    ReaderConfig {
        reopen: ReopenPolicy {
            max_attempts: 1,
            ..ReopenPolicy::immediate()
        },
        ..ReaderConfig::default()
    }
}

fn batch(lines: &str) -> UpdateBatch {
    UpdateBatch::parse_lines(lines)
}

async fn next_batch(viewer: &mut ViewerChannel) -> UpdateBatch {
    tokio::time::timeout(Duration::from_secs(2), viewer.recv())
        .await
        .expect("timed out waiting for batch")
        .expect("viewer channel closed")
        .as_ref()
        .clone()
}

// =============================================================================
// Scripted Deliveries
// =============================================================================

#[tokio::test]
async fn test_one_batch_per_delivery_in_order() {
    let first = tokio_test::io::Builder::new()
        .read(b"laptime/00:12.3\nlapcompare/+01.2\n")
        .read(b"currentzone/Para")
        .read(b"bolica\naccelx/0.5\n")
        .build();
    let source = ScriptedSource::new(vec![first]);

    let reader = StreamReader::open(source, single_attempt()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = reader.run(&tx, shutdown_rx).await;
    assert!(matches!(
        result,
        Err(ReaderError::ReopenExhausted { attempts: 1, .. })
    ));

    let mut batches = Vec::new();
    while let Ok(b) = rx.try_recv() {
        batches.push(b);
    }
    assert_eq!(
        batches,
        vec![
            batch("laptime/00:12.3\nlapcompare/+01.2"),
            UpdateBatch::new(),
            batch("currentzone/Parabolica\naccelx/0.5"),
        ]
    );
}

#[tokio::test]
async fn test_eof_then_new_data_no_duplicates_no_drops() {
    let first = tokio_test::io::Builder::new()
        .read(b"laptime/00:01.0\n")
        .read(b"laptime/00:02.0\naccely/0.")
        .build();
    let second = tokio_test::io::Builder::new()
        .read(b"25\naccelx/-0.2\n")
        .read(b"laptime/00:03.0\n")
        .build();
    let source = ScriptedSource::new(vec![first, second]);

    let reader = StreamReader::open(source, single_attempt()).await.unwrap();
    let status = reader.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    assert!(reader.run(&tx, shutdown_rx).await.is_err());

    let mut records: Vec<UpdateRecord> = Vec::new();
    while let Ok(b) = rx.try_recv() {
        records.extend(b);
    }
    // The partial accely line died with the first handle; "25" alone is
    // malformed and dropped
    assert_eq!(
        records,
        vec![
            UpdateRecord::lap_time("00:01.0"),
            UpdateRecord::lap_time("00:02.0"),
            UpdateRecord::accel_x(-0.2),
            UpdateRecord::lap_time("00:03.0"),
        ]
    );

    let status = status.borrow().clone();
    assert_eq!(status.generation, 2);
    assert_eq!(status.discarded_bytes, "accely/0.".len() as u64);
    assert_eq!(status.dropped_lines, 1);
    assert_eq!(status.state, StreamState::Closed);
}

#[tokio::test]
async fn test_initial_open_failure_is_fatal() {
    let source = ScriptedSource::new(Vec::new());
    let result = StreamReader::open(source, ReaderConfig::default()).await;
    assert!(matches!(result, Err(ReaderError::Open { .. })));
}

#[tokio::test]
async fn test_reopen_retries_until_limit() {
    let only = tokio_test::io::Builder::new().read(b"laptime/1\n").build();
    let source = ScriptedSource::new(vec![only]);
    let config = ReaderConfig {
        reopen: ReopenPolicy {
            max_attempts: 3,
            ..ReopenPolicy::immediate()
        },
        ..ReaderConfig::default()
    };

    let reader = StreamReader::open(source, config).await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    match reader.run(&tx, shutdown_rx).await {
        Err(ReaderError::ReopenExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

// =============================================================================
// Pipe Lifecycle With Viewers
// =============================================================================

#[tokio::test]
async fn test_pipe_writer_cycles_reach_all_viewers() {
    let hub = BroadcastHub::new();
    let mut early = ViewerChannel::connect(&hub, 64, ViewerMetadata::default());

    let (source, writers) = pipe();
    let mut writer = writers.connect();
    let reader = StreamReader::open(source, ReaderConfig::default())
        .await
        .unwrap();
    let mut status = reader.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sink = hub.clone();
    let task = tokio::spawn(async move { reader.run(&sink, shutdown_rx).await });

    writer.write_all(b"laptime/00:01.0\n").await.unwrap();
    assert_eq!(next_batch(&mut early).await, batch("laptime/00:01.0"));

    // A late viewer gets no history and does not disturb the first one
    let mut late = ViewerChannel::connect(&hub, 64, ViewerMetadata::default());
    writer.write_all(b"laptime/00:02.0\n").await.unwrap();
    assert_eq!(next_batch(&mut early).await, batch("laptime/00:02.0"));
    assert_eq!(next_batch(&mut late).await, batch("laptime/00:02.0"));

    // Writer goes away mid-line; the reader waits for the next one
    writer.write_all(b"currentzone/Les").await.unwrap();
    drop(writer);
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.state == StreamState::Ended),
    )
    .await
    .unwrap()
    .unwrap();

    let mut writer = writers.connect();
    writer.write_all(b"mo\ncurrentzone/Lesmo 2\n").await.unwrap();
    assert_eq!(next_batch(&mut early).await, batch("currentzone/Lesmo 2"));
    assert_eq!(next_batch(&mut late).await, batch("currentzone/Lesmo 2"));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();

    assert!(hub.contains(&early.id()));
    assert!(hub.contains(&late.id()));
    let final_status = status.borrow().clone();
    assert_eq!(final_status.generation, 2);
    assert_eq!(final_status.state, StreamState::Closed);
    assert_eq!(final_status.discarded_bytes, "currentzone/Les".len() as u64);
}

#[tokio::test]
async fn test_viewer_disconnect_does_not_affect_reader_or_others() {
    let hub = BroadcastHub::new();
    let mut stays = ViewerChannel::connect(&hub, 64, ViewerMetadata::default());
    let mut leaves = ViewerChannel::connect(&hub, 64, ViewerMetadata::default());

    let (source, writers) = pipe();
    let mut writer = writers.connect();
    let reader = StreamReader::open(source, ReaderConfig::default())
        .await
        .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sink = hub.clone();
    let task = tokio::spawn(async move { reader.run(&sink, shutdown_rx).await });

    writer.write_all(b"accelx/0.1\n").await.unwrap();
    assert_eq!(next_batch(&mut stays).await, batch("accelx/0.1"));
    assert_eq!(next_batch(&mut leaves).await, batch("accelx/0.1"));

    assert!(leaves.handle_signal(relay_core::ViewerSignal::DisconnectRequested));
    assert!(!leaves.handle_signal(relay_core::ViewerSignal::RemoteClosed));
    assert_eq!(hub.count(), 1);

    writer.write_all(b"accelx/0.2\n").await.unwrap();
    assert_eq!(next_batch(&mut stays).await, batch("accelx/0.2"));
    assert!(leaves.recv().await.is_none());

    shutdown_tx.send(true).unwrap();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_while_waiting_for_writer() {
    let (source, writers) = pipe();
    let writer = writers.connect();
    let reader = StreamReader::open(source, ReaderConfig::default())
        .await
        .unwrap();
    let mut status = reader.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, _rx) = mpsc::unbounded_channel::<UpdateBatch>();
    let task = tokio::spawn(async move { reader.run(&tx, shutdown_rx).await });

    drop(writer);
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| s.state == StreamState::Ended),
    )
    .await
    .unwrap()
    .unwrap();

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    drop(writers);
}

// =============================================================================
// Named Pipe
// =============================================================================

#[cfg(unix)]
mod named_pipe {
    use super::*;
    use pretty_assertions::assert_eq;

    use std::io::Write;
    use std::path::{Path, PathBuf};

    use nix::sys::stat::Mode;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use relay_core::FileSource;

    fn make_fifo(dir: &Path) -> PathBuf {
        let path = dir.join("sensorgrabber.fifo");
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        path
    }

    /// One writer session on a blocking thread
    ///
    /// Opening blocks until the relay has the pipe open for reading. The
    /// writer stays connected until the returned sender fires or is dropped.
    fn writer_session(
        path: PathBuf,
        lines: &'static str,
    ) -> (oneshot::Sender<()>, JoinHandle<()>) {
        let (hang_up, wait) = oneshot::channel::<()>();
        let task = tokio::task::spawn_blocking(move || {
            let mut fifo = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            fifo.write_all(lines.as_bytes()).unwrap();
            let _ = wait.blocking_recv();
        });
        (hang_up, task)
    }

    async fn next_non_empty(rx: &mut mpsc::UnboundedReceiver<UpdateBatch>) -> UpdateBatch {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let b = rx.recv().await.expect("reader stopped");
                if !b.is_empty() {
                    return b;
                }
            }
        })
        .await
        .expect("timed out waiting for batch")
    }

    #[tokio::test]
    async fn test_fifo_delivers_across_writer_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path());

        let (hang_up, first) =
            writer_session(path.clone(), "laptime/00:12.3\nlapcompare/+01.2\n");
        let reader = StreamReader::open(FileSource::new(path.clone()), ReaderConfig::default())
            .await
            .unwrap();
        let mut status = reader.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { reader.run(&tx, shutdown_rx).await });

        assert_eq!(
            next_non_empty(&mut rx).await,
            batch("laptime/00:12.3\nlapcompare/+01.2")
        );

        // Writer hangs up: end-of-stream, then the reader waits in open
        drop(hang_up);
        first.await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.state == StreamState::Ended),
        )
        .await
        .unwrap()
        .unwrap();

        let (hang_up, second) =
            writer_session(path.clone(), "currentzone/Ascari\naccely/0.5\n");
        assert_eq!(
            next_non_empty(&mut rx).await,
            batch("currentzone/Ascari\naccely/0.5")
        );
        assert_eq!(status.borrow().generation, 2);
        assert_eq!(status.borrow().state, StreamState::Open);

        // Stop while the second writer is still connected, then let it go so
        // the pending blocking read sees end-of-stream
        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        drop(hang_up);
        second.await.unwrap();

        let mut leftovers = Vec::new();
        while let Ok(b) = rx.try_recv() {
            if !b.is_empty() {
                leftovers.push(b);
            }
        }
        assert!(leftovers.is_empty(), "duplicated {leftovers:?}");
        assert_eq!(status.borrow().discarded_bytes, 0);
    }

    #[tokio::test]
    async fn test_fifo_open_waits_for_a_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path());

        let mut open = Box::pin(StreamReader::open(
            FileSource::new(path.clone()),
            ReaderConfig::default(),
        ));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), &mut open)
                .await
                .is_err(),
            "open returned without a writer"
        );

        let (hang_up, writer) = writer_session(path, "accelx/-0.2\n");
        let reader = tokio::time::timeout(Duration::from_secs(2), open)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reader.status().generation, 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { reader.run(&tx, shutdown_rx).await });
        assert_eq!(next_non_empty(&mut rx).await, batch("accelx/-0.2"));

        shutdown_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
        drop(hang_up);
        writer.await.unwrap();
    }
}
