//! Client facade: remote commands plus a managed event stream.
//!
//! A [`GerritClient`] owns one event queue and at most one running stream
//! session. Starting the stream opens a channel through the
//! [`StreamTransport`] and hands it to a [`StreamReader`] task; callers pull
//! events with [`GerritClient::get_event`] or the [`GerritClient::events`]
//! stream.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_core::Stream;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::events::{Change, DecodeError, Event, EventDecoder};
use crate::stream::{
    DecodeErrorHook, EventQueue, QueueConfig, QueueError, StreamReader, StreamState, StreamStats,
    StreamStatsSnapshot,
};
use crate::transport::{
    CommandOutput, CommandTransport, SshTarget, SshTransport, StreamTransport, TransportError,
};

/// Default bound on how long a stop waits for the worker.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote command that produces the event stream.
pub const STREAM_EVENTS_COMMAND: &str = "gerrit stream-events";

static VERSION_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"gerrit version (.*)"));

/// Outcome of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// The full command as sent, including the `gerrit` prefix.
    pub command: String,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    fn new(command: String, output: CommandOutput) -> Self {
        Self {
            command,
            exit_status: output.exit_status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Non-empty stdout lines.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().filter(|line| !line.trim().is_empty())
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_status {
            Some(code) => write!(f, "`{}` exited with status {code}", self.command)?,
            None => write!(f, "`{}` was terminated by a signal", self.command)?,
        }
        if let Some(line) = self.stderr.lines().find(|l| !l.trim().is_empty()) {
            write!(f, ": {}", line.trim())?;
        }
        Ok(())
    }
}

/// Error type for client operations.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Event stream is already running")]
    AlreadyRunning,
    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),
    #[error("Command failed: {0}")]
    Command(Box<CommandResult>),
    #[error("Query error: {0}")]
    Query(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

struct StreamSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Facade over a Gerrit server's ssh interface.
pub struct GerritClient {
    commands: Arc<dyn CommandTransport>,
    streams: Arc<dyn StreamTransport>,
    username: Option<String>,
    stream_command: String,
    stop_timeout: Duration,
    decoder: Arc<EventDecoder>,
    queue: Arc<EventQueue>,
    state: Arc<watch::Sender<StreamState>>,
    /// Cumulative across sessions.
    stats: Arc<StreamStats>,
    on_decode_error: Option<DecodeErrorHook>,
    session: Mutex<Option<StreamSession>>,
    version: OnceCell<String>,
}

impl GerritClient {
    /// Client that talks to `target` through the `ssh` binary.
    #[must_use]
    pub fn new(target: SshTarget) -> Self {
        let username = target.get_username().map(str::to_string);
        let transport = Arc::new(SshTransport::new(target));
        Self::with_transports(transport.clone(), transport).with_username(username)
    }

    /// Client built from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.ssh.target())
            .with_queue(config.stream.queue_config())
            .with_stream_command(&config.stream.command)
            .with_stop_timeout(config.stream.stop_timeout())
    }

    /// Client over arbitrary transports.
    #[must_use]
    pub fn with_transports(
        commands: Arc<dyn CommandTransport>,
        streams: Arc<dyn StreamTransport>,
    ) -> Self {
        let (state, _) = watch::channel(StreamState::NotStarted);
        Self {
            commands,
            streams,
            username: None,
            stream_command: STREAM_EVENTS_COMMAND.to_string(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            decoder: Arc::new(EventDecoder::new()),
            queue: Arc::new(EventQueue::default()),
            state: Arc::new(state),
            stats: Arc::new(StreamStats::default()),
            on_decode_error: None,
            session: Mutex::new(None),
            version: OnceCell::new(),
        }
    }

    /// Use a decoder with extra registered kinds.
    #[must_use]
    pub fn with_decoder(mut self, decoder: EventDecoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    #[must_use]
    pub fn with_queue(mut self, config: QueueConfig) -> Self {
        self.queue = Arc::new(EventQueue::new(config));
        self
    }

    #[must_use]
    pub fn with_stream_command(mut self, command: impl Into<String>) -> Self {
        self.stream_command = command.into();
        self
    }

    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Observe lines the stream could not decode.
    #[must_use]
    pub fn on_decode_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DecodeError) + Send + Sync + 'static,
    {
        self.on_decode_error = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Run `gerrit <command>` and capture its output.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the session could not be established and
    /// `Command` if the command exited with a non-zero status.
    pub async fn run_command(&self, command: &str) -> Result<CommandResult, ClientError> {
        let command = format!("gerrit {command}");
        tracing::debug!(command = %command, "Running command");

        let output = self.commands.execute(&command).await?;
        let result = CommandResult::new(command, output);
        if result.success() {
            Ok(result)
        } else {
            tracing::warn!(command = %result.command, status = ?result.exit_status, "Command failed");
            Err(ClientError::Command(Box::new(result)))
        }
    }

    /// Run a change query and return the matching changes.
    ///
    /// # Errors
    ///
    /// Returns `Query` when the server reports a query error or answers with
    /// something that is not a change record.
    pub async fn query(&self, term: &str) -> Result<Vec<Change>, ClientError> {
        let command = format!(
            "query --current-patch-set --all-approvals --format JSON --commit-message {}",
            shell_escape::unix::escape(Cow::Borrowed(term))
        );
        let result = self.run_command(&command).await?;
        parse_query_output(&result)
    }

    /// Server version, fetched once and cached.
    ///
    /// Empty when the server's answer does not look like a version line.
    ///
    /// # Errors
    ///
    /// Returns an error if the `version` command fails.
    pub async fn gerrit_version(&self) -> Result<String, ClientError> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let result = self.run_command("version").await?;
                Ok::<_, ClientError>(parse_version(&result.stdout)?)
            })
            .await?;
        Ok(version.clone())
    }

    /// Configured username and server version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be fetched.
    pub async fn gerrit_info(&self) -> Result<(Option<String>, String), ClientError> {
        let version = self.gerrit_version().await?;
        Ok((self.username.clone(), version))
    }

    /// Open the event stream and start the background reader.
    ///
    /// Events left over from a previous session are discarded.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` while a session is active and `Connection`
    /// if the channel cannot be opened.
    pub async fn start_event_stream(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        let running = session.as_ref().is_some_and(|s| !s.handle.is_finished());
        if running && self.state.borrow().is_active() {
            return Err(ClientError::AlreadyRunning);
        }
        if let Some(finished) = session.take() {
            if let Err(e) = finished.handle.await {
                tracing::warn!(error = %e, "Previous event stream worker failed");
            }
        }

        let channel = self.streams.open_stream(&self.stream_command).await?;

        self.queue.reset();
        self.state.send_replace(StreamState::Running);

        let cancel = CancellationToken::new();
        let reader = StreamReader::new(
            channel,
            Arc::clone(&self.decoder),
            Arc::clone(&self.queue),
            Arc::clone(&self.state),
            cancel.clone(),
        )
        .with_stats(Arc::clone(&self.stats))
        .on_decode_error(self.on_decode_error.clone());

        *session = Some(StreamSession {
            cancel,
            handle: tokio::spawn(reader.run()),
        });
        tracing::info!(command = %self.stream_command, "Event stream started");
        Ok(())
    }

    /// Stop the stream and wait (bounded) for the reader to exit.
    ///
    /// No-op when no session exists. Queued events are discarded.
    pub async fn stop_event_stream(&self) {
        let mut session = self.session.lock().await;
        let Some(StreamSession { cancel, mut handle }) = session.take() else {
            tracing::debug!("Event stream not running");
            return;
        };

        self.state.send_if_modified(|state| {
            if *state == StreamState::Running {
                *state = StreamState::Stopping;
                true
            } else {
                false
            }
        });
        cancel.cancel();

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Event stream worker failed"),
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.stop_timeout,
                    "Event stream worker did not stop in time, abandoning it"
                );
                handle.abort();
            }
        }

        self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = StreamState::Stopped;
                true
            } else {
                false
            }
        });
        self.queue.close();
        let discarded = self.queue.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded queued events");
        }
        tracing::info!("Event stream stopped");
    }

    /// Next queued event.
    ///
    /// `None` waits indefinitely. Returns `None` on timeout, or at once when
    /// the stream has ended and the queue is drained.
    pub async fn get_event(&self, timeout: Option<Duration>) -> Option<Event> {
        self.queue.pop(timeout).await
    }

    /// Next queued event without waiting.
    #[must_use]
    pub fn try_get_event(&self) -> Option<Event> {
        self.queue.try_pop()
    }

    /// Decode `line` and queue it as if it came from the stream.
    ///
    /// Blank lines are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Decode` for malformed lines and `Queue` when the queue
    /// refuses the event.
    pub async fn put_event(&self, line: &str) -> Result<(), ClientError> {
        if let Some(event) = self.decoder.decode(line)? {
            self.queue.push(event).await?;
        }
        Ok(())
    }

    /// Consume events as a stream that ends with the event stream.
    pub fn events(&self) -> impl Stream<Item = Event> + '_ {
        futures_util::stream::unfold(self, |client| async move {
            client.get_event(None).await.map(|event| (event, client))
        })
    }

    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn stream_stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of events waiting to be consumed.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for GerritClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GerritClient")
            .field("username", &self.username)
            .field("stream_command", &self.stream_command)
            .field("state", &*self.state.borrow())
            .field("pending_events", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Drop for GerritClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

fn parse_query_output(result: &CommandResult) -> Result<Vec<Change>, ClientError> {
    let mut changes = Vec::new();
    for line in result.stdout_lines() {
        let data: Value = serde_json::from_str(line)
            .map_err(|e| ClientError::Query(format!("Query returned invalid data: {e}")))?;

        if data.get("type").and_then(Value::as_str) == Some("error") {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ClientError::Query(message.to_string()));
        }

        // The trailing stats record has no project.
        if data.get("project").is_none() {
            continue;
        }
        let change = serde_json::from_value(data)
            .map_err(|e| ClientError::Query(format!("Query returned invalid change: {e}")))?;
        changes.push(change);
    }
    Ok(changes)
}

fn parse_version(output: &str) -> Result<String, regex::Error> {
    let pattern = VERSION_PATTERN.as_ref().map_err(Clone::clone)?;
    Ok(pattern
        .captures(output.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default())
}
