//! Background worker that turns a line channel into queued events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::events::{DecodeError, Event, EventDecoder};
use crate::stream::{EventQueue, PushOutcome, QueueError};
use crate::transport::LineChannel;

/// Reported when the remote end hangs up without an explanation.
pub const CONNECTION_CLOSED: &str = "Remote server connection closed";

/// Lifecycle of an event stream session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    NotStarted,
    Running,
    Stopping,
    /// Stopped on request.
    Stopped,
    /// Ended because the channel closed or failed.
    Errored(String),
}

impl StreamState {
    /// Returns true while the worker is (or may still be) reading.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    /// Returns true once no more events will be produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Stopped | Self::Errored(_))
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Errored(reason) => write!(f, "errored: {reason}"),
        }
    }
}

/// Called for every line that fails to decode.
pub type DecodeErrorHook = Arc<dyn Fn(&DecodeError) + Send + Sync>;

/// Counters updated by the worker.
#[derive(Debug, Default)]
pub struct StreamStats {
    lines_read: AtomicU64,
    events_queued: AtomicU64,
    decode_errors: AtomicU64,
    events_dropped: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub lines_read: u64,
    pub events_queued: u64,
    pub decode_errors: u64,
    /// Events lost to a full queue, including evicted ones.
    pub events_dropped: u64,
}

impl StreamStats {
    #[must_use]
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_line(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_push(&self, result: Result<PushOutcome, QueueError>) {
        match result {
            Ok(PushOutcome::Queued) => {
                self.events_queued.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PushOutcome::EvictedOldest) => {
                self.events_queued.fetch_add(1, Ordering::Relaxed);
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => self.record_dropped(),
        }
    }
}

/// How the read loop ended.
enum Exit {
    Cancelled,
    Ended(String),
}

/// Owns a line channel for the lifetime of one stream session.
pub struct StreamReader {
    channel: Box<dyn LineChannel>,
    sink: Sink,
}

/// Everything the reader touches besides the channel.
struct Sink {
    decoder: Arc<EventDecoder>,
    queue: Arc<EventQueue>,
    state: Arc<watch::Sender<StreamState>>,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
    on_decode_error: Option<DecodeErrorHook>,
}

impl StreamReader {
    #[must_use]
    pub fn new(
        channel: Box<dyn LineChannel>,
        decoder: Arc<EventDecoder>,
        queue: Arc<EventQueue>,
        state: Arc<watch::Sender<StreamState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            sink: Sink {
                decoder,
                queue,
                state,
                stats: Arc::new(StreamStats::default()),
                cancel,
                on_decode_error: None,
            },
        }
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<StreamStats>) -> Self {
        self.sink.stats = stats;
        self
    }

    #[must_use]
    pub fn on_decode_error(mut self, hook: Option<DecodeErrorHook>) -> Self {
        self.sink.on_decode_error = hook;
        self
    }

    /// Read until cancelled or the channel ends.
    ///
    /// The read is raced against cancellation, so a stop request never waits
    /// on a blocked read. If the stream ended on its own the state becomes
    /// `Errored` first, then an `error-event` sentinel is queued without
    /// waiting and the queue is closed so waiting callers return. The channel
    /// is closed on every exit.
    pub async fn run(self) {
        let Self { mut channel, sink } = self;
        tracing::debug!("Event stream reader started");

        let exit = loop {
            let next = tokio::select! {
                biased;
                () = sink.cancel.cancelled() => break Exit::Cancelled,
                line = channel.read_line() => line,
            };

            match next {
                Ok(Some(line)) => {
                    sink.handle_line(&line).await;
                    if sink.cancel.is_cancelled() {
                        break Exit::Cancelled;
                    }
                }
                Ok(None) => break Exit::Ended(CONNECTION_CLOSED.to_string()),
                Err(e) => {
                    tracing::error!(error = %e, "Event stream read failed");
                    break Exit::Ended(e.to_string());
                }
            }
        };

        if let Exit::Ended(reason) = &exit {
            sink.finish_errored(reason);
        }

        if let Err(e) = channel.close().await {
            tracing::warn!(error = %e, "Failed to close event stream channel");
        }

        if matches!(exit, Exit::Cancelled) {
            tracing::debug!("Event stream reader stopped");
            sink.state.send_replace(StreamState::Stopped);
            sink.queue.close();
        }
    }
}

impl Sink {
    async fn handle_line(&self, line: &str) {
        self.stats.record_line();

        let event = match self.decoder.decode(line) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(line = %e.line, error = %e.reason, "Skipping malformed event line");
                self.stats.record_decode_error();
                if let Some(hook) = &self.on_decode_error {
                    hook(&e);
                }
                return;
            }
        };

        let kind = event.kind().to_string();
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            result = self.queue.push(event) => result,
        };

        match &result {
            Ok(PushOutcome::Queued) => tracing::trace!(kind = %kind, "Queued event"),
            Ok(PushOutcome::EvictedOldest) => {
                tracing::warn!(kind = %kind, "Queue full, evicted oldest event");
            }
            Err(e) => tracing::warn!(kind = %kind, error = %e, "Dropped event"),
        }
        self.stats.record_push(result);
    }

    fn finish_errored(&self, reason: &str) {
        tracing::warn!(reason = %reason, "Event stream ended");
        self.state.send_replace(StreamState::Errored(reason.to_string()));

        match self.queue.close_with(Event::stream_error(reason.to_string())) {
            Ok(PushOutcome::Queued) => {}
            Ok(PushOutcome::EvictedOldest) => {
                tracing::warn!("Queue full, evicted oldest event for the stream error event");
                self.stats.record_dropped();
            }
            Err(e) => tracing::warn!(error = %e, "Could not queue stream error event"),
        }
    }
}
