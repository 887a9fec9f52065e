//! Per-session shared state and the supervisor task.
//!
//! Every registration is driven by one spawned task that owns the open
//! transport stream, the keep-alive interval and the backoff sleep. Owning
//! all three in one task means a keep-alive tick can never race a pending
//! reconnect and at most one open is in flight per session.
//!
//! ```text
//!            ┌──────────── Reconnect ─────────────┐
//!            ▼                                    │
//!  start ─► connecting ─► connected ──(error|close|stale)──► backoff ─► connecting
//!            │                │                               │
//!            └──── Close ─────┴────────── Close ──────────────┴─► stopped
//!                                   backoff with retries exhausted ─► stopped
//! ```

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    backoff::calculate_backoff,
    config::StreamConfig,
    error::{StreamError, StreamResult},
    listener::StreamListener,
    source::{EventSource, RawFrame, SourceEvent},
    types::{FrameKind, StreamStatus, decode_event},
};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Registry of live sessions keyed by stream id.
pub(crate) type Registry = scc::HashMap<String, SessionEntry>;

/// Reply channel settled by the first open of an attempt sequence.
pub(crate) type OpenReply = oneshot::Sender<StreamResult<()>>;

#[derive(Clone, Copy)]
struct Activity {
    at: Instant,
    wall: SystemTime,
}

impl Activity {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: SystemTime::now(),
        }
    }
}

/// Status shared between the supervisor task and manager queries.
pub(crate) struct SessionState {
    connected: AtomicBool,
    retry_count: AtomicU32,
    activity: Mutex<Activity>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            activity: Mutex::new(Activity::now()),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::AcqRel)
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    fn set_retry_count(&self, count: u32) {
        self.retry_count.store(count, Ordering::Release);
    }

    /// Keep the reported count within a lowered retry budget.
    pub(crate) fn clamp_retry_count(&self, max_retries: u32) {
        self.retry_count.fetch_min(max_retries, Ordering::AcqRel);
    }

    fn touch(&self) {
        *self.activity.lock() = Activity::now();
    }

    fn idle_for(&self) -> Duration {
        self.activity.lock().at.elapsed()
    }

    pub(crate) fn status(&self) -> StreamStatus {
        StreamStatus {
            is_connected: self.is_connected(),
            retry_count: self.retry_count(),
            last_event_time: self.activity.lock().wall,
        }
    }
}

/// Control commands sent to a supervisor task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Tear the session down.
    Close,
    /// Drop the current connection and open again with a fresh retry budget.
    Reconnect { reply: OpenReply },
}

/// Registry entry for one live session.
pub(crate) struct SessionEntry {
    pub(crate) generation: u64,
    pub(crate) config: Arc<RwLock<StreamConfig>>,
    pub(crate) state: Arc<SessionState>,
    cmd_tx: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionEntry {
    pub(crate) fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.cmd_tx.clone()
    }

    /// Stop the supervisor and wait until its connection and timers are gone.
    pub(crate) async fn shutdown(self) {
        let stream_id = self.config.read().stream_id.clone();
        // A send error means the task already exited on its own.
        let _ = self.cmd_tx.send(SessionCommand::Close).await;
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            error!(stream_id = %stream_id, "Stream supervisor panicked");
        }
    }
}

/// A session that has been spawned but is held at the start gate.
pub(crate) struct SpawnedSession {
    pub(crate) entry: SessionEntry,
    pub(crate) opened: oneshot::Receiver<StreamResult<()>>,
    pub(crate) start: oneshot::Sender<()>,
}

/// Spawn the supervisor for `config`.
///
/// The task waits on the returned `start` gate so the caller can register
/// the entry before anything (including retry exhaustion) can happen.
pub(crate) fn spawn(
    config: StreamConfig,
    generation: u64,
    listener: Arc<dyn StreamListener>,
    source: Arc<dyn EventSource>,
    registry: Weak<Registry>,
) -> SpawnedSession {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (open_tx, opened) = oneshot::channel();
    let (start, start_rx) = oneshot::channel();

    let stream_id = config.stream_id.clone();
    let config = Arc::new(RwLock::new(config));
    let state = Arc::new(SessionState::new());

    let driver = SessionDriver {
        stream_id,
        generation,
        config: Arc::clone(&config),
        state: Arc::clone(&state),
        listener,
        source,
        registry,
        cmd_rx,
        pending_open: Some(open_tx),
    };
    let task = tokio::spawn(driver.run(start_rx));

    SpawnedSession {
        entry: SessionEntry {
            generation,
            config,
            state,
            cmd_tx,
            task,
        },
        opened,
        start,
    }
}

enum Next {
    Connect,
    Backoff,
    Stop,
}

struct SessionDriver {
    stream_id: String,
    generation: u64,
    config: Arc<RwLock<StreamConfig>>,
    state: Arc<SessionState>,
    listener: Arc<dyn StreamListener>,
    source: Arc<dyn EventSource>,
    registry: Weak<Registry>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    pending_open: Option<OpenReply>,
}

impl SessionDriver {
    async fn run(mut self, start: oneshot::Receiver<()>) {
        if start.await.is_err() {
            return;
        }

        let mut next = Next::Connect;
        loop {
            next = match next {
                Next::Connect => self.run_connection().await,
                Next::Backoff => self.wait_for_retry().await,
                Next::Stop => return,
            };
        }
    }

    /// One connection attempt, from open until it fails or is cancelled.
    async fn run_connection(&mut self) -> Next {
        let (url, headers, tuning) = {
            let config = self.config.read();
            (
                config.url.clone(),
                config.request_headers(),
                config.tuning.clone(),
            )
        };
        info!(
            stream_id = %self.stream_id,
            url = %url,
            attempt = self.state.retry_count(),
            "Stream connecting"
        );

        let mut source = self.source.open(&url, &headers);
        let mut keep_alive: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => return self.handle_command(cmd),

                () = tick(&mut keep_alive) => {
                    let idle = self.state.idle_for();
                    if idle > tuning.max_inactivity {
                        warn!(
                            stream_id = %self.stream_id,
                            idle_secs = idle.as_secs(),
                            "No events received, treating stream as stalled"
                        );
                        self.connection_lost(Some(StreamError::inactive(idle)));
                        return Next::Backoff;
                    }
                }

                item = source.next() => match item {
                    Some(SourceEvent::Open) => {
                        self.opened();
                        keep_alive = Some(keep_alive_interval(tuning.keep_alive_check_interval));
                    }
                    Some(SourceEvent::Frame(frame)) => self.handle_frame(frame),
                    Some(SourceEvent::Error(err)) => {
                        error!(stream_id = %self.stream_id, error = %err, "Stream connection error");
                        self.connection_lost(Some(err));
                        return Next::Backoff;
                    }
                    Some(SourceEvent::Closed) | None => {
                        warn!(stream_id = %self.stream_id, "Stream closed by server");
                        self.connection_lost(None);
                        return Next::Backoff;
                    }
                },
            }
        }
    }

    /// Schedule the next attempt, or give up when the budget is spent.
    async fn wait_for_retry(&mut self) -> Next {
        let (max_retries, backoff) = {
            let config = self.config.read();
            (config.tuning.max_retries, config.tuning.backoff())
        };

        let attempt = self.state.retry_count();
        if attempt >= max_retries {
            self.exhausted(max_retries);
            return Next::Stop;
        }

        let delay = calculate_backoff(backoff, attempt);
        self.state.set_retry_count(attempt + 1);
        warn!(
            stream_id = %self.stream_id,
            attempt = attempt + 1,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            "Stream reconnecting after backoff"
        );

        tokio::select! {
            biased;

            cmd = self.cmd_rx.recv() => self.handle_command(cmd),
            () = tokio::time::sleep(delay) => Next::Connect,
        }
    }

    fn handle_command(&mut self, cmd: Option<SessionCommand>) -> Next {
        match cmd {
            Some(SessionCommand::Close) | None => {
                if self.state.set_connected(false) {
                    self.listener.on_disconnected(&self.stream_id);
                }
                self.settle_pending(StreamError::connection_closed(Some(
                    "stream disconnected".to_string(),
                )));
                info!(stream_id = %self.stream_id, "Stream disconnected");
                Next::Stop
            }
            Some(SessionCommand::Reconnect { reply }) => {
                info!(stream_id = %self.stream_id, "Manual reconnect requested");
                if self.state.set_connected(false) {
                    self.listener.on_disconnected(&self.stream_id);
                }
                self.state.set_retry_count(0);
                self.settle_pending(StreamError::connection_closed(Some(
                    "superseded by manual reconnect".to_string(),
                )));
                self.pending_open = Some(reply);
                Next::Connect
            }
        }
    }

    fn opened(&mut self) {
        self.state.set_retry_count(0);
        self.state.touch();
        self.state.set_connected(true);
        info!(stream_id = %self.stream_id, "Stream connected");
        self.listener.on_connected(&self.stream_id);
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn handle_frame(&self, frame: RawFrame) {
        // Liveness is independent of whether the payload is usable.
        self.state.touch();

        let kind = FrameKind::classify(&frame.event);
        trace!(
            stream_id = %self.stream_id,
            event_type = %frame.event,
            kind = %kind,
            "Frame received"
        );

        match kind {
            FrameKind::Data => match decode_event(&self.stream_id, &frame.data) {
                Ok(Some(event)) => self.listener.on_data(event),
                Ok(None) => trace!(stream_id = %self.stream_id, "Dropping frame without data"),
                Err(err) => warn!(
                    stream_id = %self.stream_id,
                    error = %err,
                    "Dropping malformed frame"
                ),
            },
            FrameKind::KeepAlive => {}
            FrameKind::Control => warn!(
                stream_id = %self.stream_id,
                event_type = %frame.event,
                "Server revoked the stream"
            ),
            FrameKind::Unknown => debug!(
                stream_id = %self.stream_id,
                event_type = %frame.event,
                "Ignoring unknown frame type"
            ),
        }
    }

    fn connection_lost(&mut self, error: Option<StreamError>) {
        self.state.set_connected(false);
        self.listener.on_disconnected(&self.stream_id);
        if let Some(err) = &error {
            self.listener.on_error(err);
        }
        self.settle_pending(error.unwrap_or_else(|| {
            StreamError::connection_closed(Some("stream closed before opening".to_string()))
        }));
    }

    /// Fail the outstanding open reply, if any.
    fn settle_pending(&mut self, error: StreamError) {
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn exhausted(&mut self, max_retries: u32) {
        error!(
            stream_id = %self.stream_id,
            max_retries,
            "Max reconnect attempts reached, giving up"
        );
        if let Some(registry) = self.registry.upgrade() {
            let generation = self.generation;
            let stream_id = &self.stream_id;
            registry.retain_sync(|id, entry| !(id == stream_id && entry.generation == generation));
        }
        self.settle_pending(StreamError::connection_closed(Some(
            "max reconnect attempts reached".to_string(),
        )));
        self.listener.on_max_retries_reached(&self.stream_id);
    }
}

fn keep_alive_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
