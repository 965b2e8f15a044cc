//! Relay HTTP and WebSocket server
//!
//! | Path | Description |
//! |------|-------------|
//! | `/` | Instrument cluster page |
//! | `/cluster.js` | Browser render loop |
//! | `/ws` | Viewer WebSocket (telemetry out, commands in) |
//! | `/status` | JSON summary of the upstream stream and connected viewers |
//! | `/assets` | Optional static directory |
//!
//! Each accepted WebSocket becomes one [`ViewerChannel`] driven by its own
//! task. The upstream reader publishes into the shared [`BroadcastHub`].
//!
//! A session holds one viewer slot from before the upgrade until its task
//! ends, so `max_viewers` holds under concurrent upgrades. Every frame write
//! is bounded by `send_timeout`; a viewer whose socket stops draining is
//! evicted instead of pinning its task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::ws::{close_code, CloseCode, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, info_span, warn, Instrument};

use relay_core::reader::wait_for_shutdown;
use relay_core::wire::{encode_event, signal_from_text, MAX_INBOUND_MESSAGE_SIZE};
use relay_core::{
    BroadcastHub, CloseReason, HubSummary, ReaderError, RelayConfig, StreamReader, StreamStatus,
    UpstreamSource, ViewerChannel, ViewerEvent, ViewerId, ViewerMetadata, ViewerSignal,
};

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");
const CLUSTER_JS: &str = include_str!("../assets/cluster.js");

/// How long the HTTP server gets to drain after shutdown
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tracked viewer session
struct SessionState {
    connected_at: Instant,
    peer_addr: Option<SocketAddr>,
    abort_handle: AbortHandle,
}

/// Session entry in the status report
#[derive(Debug, Serialize)]
struct SessionSummary {
    viewer_id: ViewerId,
    peer_addr: Option<SocketAddr>,
    connected_secs: u64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    version: &'static str,
    uptime_secs: u64,
    upstream: StreamStatus,
    hub: HubSummary,
    sessions: Vec<SessionSummary>,
}

struct Shared {
    config: RelayConfig,
    hub: BroadcastHub,
    sessions: DashMap<ViewerId, SessionState>,
    viewer_slots: Arc<Semaphore>,
    status_tx: watch::Sender<StreamStatus>,
    shutdown: Arc<watch::Sender<bool>>,
    started_at: Instant,
}

/// The relay server: HTTP routes, viewer sessions and the upstream reader
#[derive(Clone)]
pub struct RelayServer {
    shared: Arc<Shared>,
}

impl RelayServer {
    /// Create a server for `config`
    pub fn new(config: RelayConfig) -> Self {
        let (status_tx, _) = watch::channel(StreamStatus::default());
        let (shutdown, _) = watch::channel(false);
        let slots = config.max_viewers.min(Semaphore::MAX_PERMITS);
        Self {
            shared: Arc::new(Shared {
                config,
                hub: BroadcastHub::new(),
                sessions: DashMap::new(),
                viewer_slots: Arc::new(Semaphore::new(slots)),
                status_tx,
                shutdown: Arc::new(shutdown),
                started_at: Instant::now(),
            }),
        }
    }

    /// The hub viewers register with
    pub fn hub(&self) -> &BroadcastHub {
        &self.shared.hub
    }

    /// Sender that stops the server when set to `true`
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shared.shutdown)
    }

    /// Number of live viewer sessions
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(dashboard_handler))
            .route("/cluster.js", get(script_handler))
            .route("/ws", get(ws_handler))
            .route("/status", get(status_handler));

        if let Some(dir) = &self.shared.config.assets_dir {
            router = router.nest_service("/assets", ServeDir::new(dir));
        }

        router
            .fallback(dashboard_handler)
            .with_state(Arc::clone(&self.shared))
    }

    /// Bind the configured listening address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.shared.config.bind;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))
    }

    /// Serve viewers and pump the upstream until shutdown
    ///
    /// # Errors
    ///
    /// Fails if the upstream cannot be opened, the reader gives up
    /// reopening, or the HTTP server stops on its own.
    pub async fn run<S: UpstreamSource + 'static>(
        self,
        listener: TcpListener,
        source: S,
    ) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .context("Failed to read listening address")?;
        info!(addr = %local_addr, "Relay listening");

        let mut http = tokio::spawn(serve_http(
            listener,
            self.router(),
            self.shared.shutdown.subscribe(),
        ));
        let mut http_done = false;

        let result = self.pump(source, &mut http, &mut http_done).await;

        self.shared.shutdown.send_replace(true);
        self.abort_sessions();

        if !http_done {
            match tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut http).await {
                Ok(Ok(Ok(()))) => debug!("HTTP server drained"),
                Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server stopped with error"),
                Ok(Err(e)) => warn!(error = %e, "HTTP task failed"),
                Err(_) => {
                    warn!("HTTP server did not drain in time");
                    http.abort();
                }
            }
        }

        result
    }

    async fn pump<S: UpstreamSource + 'static>(
        &self,
        source: S,
        http: &mut JoinHandle<io::Result<()>>,
        http_done: &mut bool,
    ) -> Result<()> {
        let mut shutdown = self.shared.shutdown.subscribe();

        let opened = tokio::select! {
            opened = StreamReader::open_reporting(
                source,
                self.shared.config.reader.clone(),
                self.shared.status_tx.clone(),
            ) => opened,
            joined = &mut *http => {
                *http_done = true;
                return http_exit(joined);
            }
            () = wait_for_shutdown(&mut shutdown) => {
                info!("Shutdown before upstream opened");
                return Ok(());
            }
        };
        let reader = opened.context("Failed to open upstream")?;
        info!(viewers = self.hub().count(), "Upstream ready, relaying");

        let hub = self.shared.hub.clone();
        let stop = self.shared.shutdown.subscribe();
        let mut reader_task = tokio::spawn(async move { reader.run(&hub, stop).await });

        let result = tokio::select! {
            joined = &mut reader_task => return reader_exit(joined),
            joined = &mut *http => {
                *http_done = true;
                http_exit(joined)
            }
            () = wait_for_shutdown(&mut shutdown) => Ok(()),
        };

        self.shared.shutdown.send_replace(true);
        if let Err(e) = reader_exit(reader_task.await) {
            warn!(error = %format!("{e:#}"), "Reader stopped with error during shutdown");
        }
        result
    }

    fn abort_sessions(&self) {
        let count = self.session_count();
        for entry in self.shared.sessions.iter() {
            entry.value().abort_handle.abort();
        }
        self.shared.sessions.clear();
        if count > 0 {
            info!(sessions = count, "Aborted viewer sessions");
        }
    }
}

async fn serve_http(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
    .await
}

fn http_exit(joined: Result<io::Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("HTTP server failed")),
        Err(e) => Err(anyhow::Error::new(e).context("HTTP task failed")),
    }
}

fn reader_exit(joined: Result<Result<(), ReaderError>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("Upstream reader stopped")),
        Err(e) => Err(anyhow::Error::new(e).context("Upstream reader task failed")),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn dashboard_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn script_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CLUSTER_JS,
    )
}

async fn status_handler(State(shared): State<Arc<Shared>>) -> Json<StatusReport> {
    let sessions = shared
        .sessions
        .iter()
        .map(|entry| SessionSummary {
            viewer_id: *entry.key(),
            peer_addr: entry.value().peer_addr,
            connected_secs: entry.value().connected_at.elapsed().as_secs(),
        })
        .collect();

    Json(StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: shared.started_at.elapsed().as_secs(),
        upstream: shared.status_tx.borrow().clone(),
        hub: shared.hub.summary(),
        sessions,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<Shared>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if *shared.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "relay shutting down").into_response();
    }

    let Ok(slot) = Arc::clone(&shared.viewer_slots).try_acquire_owned() else {
        let max = shared.config.max_viewers;
        warn!(peer = %peer, max, "Viewer limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "viewer limit reached").into_response();
    };

    let metadata = ViewerMetadata {
        peer_addr: Some(peer),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };

    ws.max_message_size(MAX_INBOUND_MESSAGE_SIZE)
        .on_upgrade(move |socket| run_session(shared, socket, metadata, slot))
}

// =============================================================================
// Viewer Sessions
// =============================================================================

/// Runs one viewer session; `_slot` is released when it returns
async fn run_session(
    shared: Arc<Shared>,
    socket: WebSocket,
    metadata: ViewerMetadata,
    _slot: OwnedSemaphorePermit,
) {
    let peer_addr = metadata.peer_addr;
    let viewer = ViewerChannel::connect(&shared.hub, shared.config.outbound_capacity, metadata);
    let id = viewer.id();
    let shutdown = shared.shutdown.subscribe();
    let send_timeout = shared.config.send_timeout;

    let task = tokio::spawn(
        drive_viewer(viewer, socket, shutdown, send_timeout)
            .instrument(info_span!("viewer", viewer_id = %id)),
    );
    shared.sessions.insert(
        id,
        SessionState {
            connected_at: Instant::now(),
            peer_addr,
            abort_handle: task.abort_handle(),
        },
    );
    info!(viewer_id = %id, peer = ?peer_addr, "Viewer connected");

    match task.await {
        Ok(reason) => info!(viewer_id = %id, reason = %reason, "Viewer session ended"),
        Err(e) if e.is_cancelled() => debug!(viewer_id = %id, "Viewer session aborted"),
        Err(e) => error!(viewer_id = %id, error = %e, "Viewer session panicked"),
    }
    shared.sessions.remove(&id);
}

fn close_message(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Why a frame write did not complete
enum SendFailure {
    Socket(axum::Error),
    Stalled,
}

/// Write one frame, giving up after `limit`
async fn send_within(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    limit: Duration,
) -> Result<(), SendFailure> {
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(sent) => sent.map_err(SendFailure::Socket),
        Err(_) => Err(SendFailure::Stalled),
    }
}

async fn drive_viewer(
    mut viewer: ViewerChannel,
    socket: WebSocket,
    mut shutdown: watch::Receiver<bool>,
    send_timeout: Duration,
) -> CloseReason {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            batch = viewer.recv() => {
                let Some(batch) = batch else {
                    let close = close_message(close_code::AGAIN, "viewer fell behind");
                    let _ = send_within(&mut sink, close, send_timeout).await;
                    break;
                };
                let text = match encode_event(&ViewerEvent::from_batch(&batch)) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode batch");
                        continue;
                    }
                };
                match send_within(&mut sink, Message::Text(text.into()), send_timeout).await {
                    Ok(()) => {}
                    Err(SendFailure::Socket(e)) => {
                        debug!(error = %e, "Send to viewer failed");
                        viewer.handle_signal(ViewerSignal::RemoteClosed);
                        break;
                    }
                    Err(SendFailure::Stalled) => {
                        warn!(
                            timeout_ms = send_timeout.as_millis() as u64,
                            "Viewer stopped draining, evicting"
                        );
                        viewer.close(CloseReason::Evicted);
                        break;
                    }
                }
            }
            msg = stream.next() => {
                let signal = match msg {
                    Some(Ok(Message::Text(text))) => signal_from_text(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => ViewerSignal::RemoteClosed,
                    Some(Ok(_)) => ViewerSignal::Ignored,
                    Some(Err(e)) => {
                        debug!(error = %e, "Viewer socket error");
                        ViewerSignal::RemoteClosed
                    }
                };
                let requested = signal == ViewerSignal::DisconnectRequested;
                if viewer.handle_signal(signal) {
                    if requested {
                        let close = close_message(close_code::NORMAL, "disconnect requested");
                        let _ = send_within(&mut sink, close, send_timeout).await;
                    }
                    break;
                }
            }
            () = wait_for_shutdown(&mut shutdown) => {
                viewer.close(CloseReason::Shutdown);
                let close = close_message(close_code::AWAY, "relay shutting down");
                let _ = send_within(&mut sink, close, send_timeout).await;
                break;
            }
        }
    }

    viewer.close_reason().unwrap_or(CloseReason::RemoteClosed)
}
