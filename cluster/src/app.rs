//! Main Application
//!
//! The App drives the render loop from three sources:
//! - Terminal events (toggle, quit)
//! - Link events from the current relay connection
//! - A frame tick that retires finished marker moves
//!
//! Link events carry a generation. Only the link the app currently holds is
//! listened to; anything from an earlier link is dropped.

use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::backend::Backend;
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use relay_core::{BatchOutcome, DashboardFrame, RenderLoop, ToggleAction};

use crate::dashboard::{self, DashboardView};
use crate::link::{spawn_link, LinkEvent, LinkHandle};

/// ~60 FPS so 100ms marker moves look smooth
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Time a closing link gets to deliver its disconnect on quit
const LINK_CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Main application state
pub struct App {
    /// Is the app still running?
    running: bool,
    /// Relay WebSocket URL
    url: String,
    /// Client render loop
    render: RenderLoop,
    /// Current link, if one is up or being attempted
    link: Option<LinkHandle>,
    /// Generation handed to the next link
    generation: u64,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    /// Last link failure, shown in the footer
    last_error: Option<String>,
}

impl App {
    /// Create an app for the relay at `url`; nothing connects yet
    pub fn new(url: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            running: true,
            url: url.into(),
            render: RenderLoop::new(),
            link: None,
            generation: 0,
            events_tx,
            events_rx,
            last_error: None,
        }
    }

    /// Is the app still running?
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The render loop
    pub fn render_loop(&self) -> &RenderLoop {
        &self.render
    }

    /// Generation of the current link, if any
    pub fn link_generation(&self) -> Option<u64> {
        self.link.as_ref().map(LinkHandle::generation)
    }

    /// Last link failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Start the first connection attempt
    pub fn connect(&mut self) {
        if self.render.begin_connect() {
            self.open_link();
        }
    }

    fn open_link(&mut self) {
        self.generation += 1;
        self.last_error = None;
        tracing::info!(url = %self.url, generation = self.generation, "Opening relay link");
        self.link = Some(spawn_link(
            self.url.clone(),
            self.generation,
            self.events_tx.clone(),
        ));
    }

    /// Status button pressed
    pub fn toggle(&mut self) {
        match self.render.toggle() {
            ToggleAction::Disconnect => {
                if let Some(link) = self.link.take() {
                    link.close();
                }
            }
            ToggleAction::Reconnect => self.open_link(),
        }
    }

    /// Apply one link event at `now`
    ///
    /// Returns `false` when the event came from a link the app no longer
    /// holds.
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) -> bool {
        if self.link_generation() != Some(event.generation()) {
            tracing::debug!(generation = event.generation(), "Dropping stale link event");
            return false;
        }

        match event {
            LinkEvent::Connected { .. } => {
                self.render.on_connected();
            }
            LinkEvent::Batch { batch, .. } => {
                if let BatchOutcome::Applied(count) = self.render.on_batch(&batch, now) {
                    tracing::trace!(records = count, "Batch applied");
                }
            }
            LinkEvent::Closed { reason, .. } => {
                self.link = None;
                self.render.on_remote_close();
                if !reason.is_empty() {
                    self.last_error = Some(format!("closed: {reason}"));
                }
            }
            LinkEvent::Failed { error, .. } => {
                self.link = None;
                self.render.on_remote_close();
                self.last_error = Some(error);
            }
        }
        true
    }

    /// Wait for the next link event
    pub async fn next_link_event(&mut self) -> Option<LinkEvent> {
        self.events_rx.recv().await
    }

    /// Handle keyboard input
    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.running = false;
            }
            KeyCode::Char('d' | ' ') => self.toggle(),
            _ => {}
        }
    }

    /// Frame to draw at `now`
    pub fn frame(&self, now: Instant) -> DashboardFrame {
        self.render.frame(now)
    }

    /// Draw the dashboard
    pub fn draw(&self, f: &mut Frame, now: Instant) {
        let frame = self.frame(now);
        let view = DashboardView {
            frame: &frame,
            url: &self.url,
            last_error: self.last_error(),
        };
        dashboard::render(f, f.area(), &view);
    }

    /// Main event loop
    pub async fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> anyhow::Result<()> {
        let mut event_stream = EventStream::new();
        let mut tick = tokio::time::interval(FRAME_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.connect();

        while self.running {
            tokio::select! {
                biased;

                maybe_event = event_stream.next() => match maybe_event {
                    // Only handle Press events (not Release or Repeat)
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Terminal event stream failed"),
                    None => self.running = false,
                },

                Some(event) = self.events_rx.recv() => {
                    self.handle_link_event(event, Instant::now());
                }

                _ = tick.tick() => self.render.tick(Instant::now()),
            }

            let now = Instant::now();
            terminal.draw(|f| self.draw(f, now))?;
        }

        if let Some(link) = self.link.take() {
            link.close_and_wait(LINK_CLOSE_GRACE).await;
        }
        Ok(())
    }
}
