//! Transports the client runs on top of.
//!
//! The client needs two things from the remote side: one-shot command
//! execution and a long-lived line channel for the event stream. Both are
//! traits so they can be backed by the `ssh` binary or by in-memory fakes.

mod channel;
mod ssh;

use std::io;

use async_trait::async_trait;

pub use channel::ReaderChannel;
pub use ssh::{SshChannel, SshTarget, SshTransport, DEFAULT_SSH_BINARY, DEFAULT_SSH_PORT};

/// Error type for transport operations.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The transport binary was not found.
    #[error("Transport binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// The remote could not be reached or refused the session.
    #[error("Failed to connect to {host}: {message}")]
    Connect { host: String, message: String },
    /// Process stdout was not available.
    #[error("Process stdout not available")]
    NoStdout,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Create a `TransportError` from a spawn failure, classifying common cases.
    pub(crate) fn from_spawn(binary: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(binary.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Captured output of a one-shot remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Runs one-shot commands, each on its own session.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Run `command` remotely and capture its output.
    async fn execute(&self, command: &str) -> Result<CommandOutput, TransportError>;
}

/// Opens long-lived line-oriented channels.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Start `command` remotely and return a channel over its stdout.
    async fn open_stream(&self, command: &str) -> Result<Box<dyn LineChannel>, TransportError>;
}

/// An ordered stream of text lines from a remote process.
#[async_trait]
pub trait LineChannel: Send {
    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Must be cancel safe: dropping the returned future loses no complete
    /// line.
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Release the channel. Safe to call more than once.
    async fn close(&mut self) -> io::Result<()>;
}
