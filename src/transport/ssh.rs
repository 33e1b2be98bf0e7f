//! Transport backed by the system `ssh` binary.
//!
//! Host aliases, proxy commands and keys from `~/.ssh/config` apply as
//! usual; anything set on [`SshTarget`] is passed on the command line and
//! takes precedence.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::{
    CommandOutput, CommandTransport, LineChannel, ReaderChannel, StreamTransport, TransportError,
};

/// Gerrit's default ssh daemon port.
pub const DEFAULT_SSH_PORT: u16 = 29418;

pub const DEFAULT_SSH_BINARY: &str = "ssh";

/// `ssh` exits with this status when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// How long to wait for the ssh process after the stream ends or on close.
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    host: String,
    port: Option<u16>,
    username: Option<String>,
    identity_file: Option<PathBuf>,
    keepalive: Option<Duration>,
    connect_timeout: Option<Duration>,
    options: Vec<String>,
    binary: String,
}

impl SshTarget {
    /// Target `host`, leaving port and user to the ssh config.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: None,
            identity_file: None,
            keepalive: None,
            connect_timeout: None,
            options: Vec::new(),
            binary: DEFAULT_SSH_BINARY.to_string(),
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Send a keepalive after this much silence.
    #[must_use]
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Add a raw `-o` option, e.g. `StrictHostKeyChecking=accept-new`.
    #[must_use]
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Use a different ssh binary (for testing).
    #[must_use]
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn get_username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// `user@host`, or just the host when no user is set.
    #[must_use]
    pub fn destination(&self) -> String {
        match &self.username {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Build the ssh command-line arguments for running `command`.
    #[must_use]
    pub fn build_args(&self, command: &str) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];

        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        if let Some(path) = &self.identity_file {
            args.push("-i".to_string());
            args.push(path.display().to_string());
        }

        if let Some(interval) = self.keepalive {
            args.push("-o".to_string());
            args.push(format!("ServerAliveInterval={}", interval.as_secs().max(1)));
        }

        if let Some(timeout) = self.connect_timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }

        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        args.push(self.destination());
        args.push(command.to_string());
        args
    }
}

/// Runs Gerrit commands through `ssh`, one process per session.
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: SshTarget,
}

impl SshTransport {
    #[must_use]
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    #[must_use]
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.target.binary);
        cmd.args(self.target.build_args(remote))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn connect_error(&self, stderr: &str) -> TransportError {
        TransportError::Connect {
            host: self.target.host.clone(),
            message: first_line(stderr).unwrap_or("ssh connection failed").to_string(),
        }
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

#[async_trait]
impl CommandTransport for SshTransport {
    async fn execute(&self, command: &str) -> Result<CommandOutput, TransportError> {
        tracing::debug!(host = %self.target.host, command = %command, "Running remote command");

        let output = self
            .command(command)
            .output()
            .await
            .map_err(|e| TransportError::from_spawn(&self.target.binary, e))?;

        let result = CommandOutput {
            exit_status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.exit_status == Some(SSH_CONNECTION_FAILURE) {
            return Err(self.connect_error(&result.stderr));
        }
        Ok(result)
    }
}

#[async_trait]
impl StreamTransport for SshTransport {
    async fn open_stream(&self, command: &str) -> Result<Box<dyn LineChannel>, TransportError> {
        tracing::debug!(host = %self.target.host, command = %command, "Opening event stream");

        let mut child = self
            .command(command)
            .spawn()
            .map_err(|e| TransportError::from_spawn(&self.target.binary, e))?;

        let stdout = child.stdout.take().ok_or(TransportError::NoStdout)?;
        let stderr = child.stderr.take();

        Ok(Box::new(SshChannel {
            child,
            lines: ReaderChannel::new(stdout),
            stderr,
        }))
    }
}

/// Line channel over the stdout of a running `ssh` process.
#[derive(Debug)]
pub struct SshChannel {
    child: Child,
    lines: ReaderChannel<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl SshChannel {
    /// Explain why the stream ended, if the process left a reason.
    async fn exit_reason(&mut self) -> Option<String> {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.stderr.take() {
            let _ = tokio::time::timeout(EXIT_TIMEOUT, pipe.read_to_string(&mut stderr)).await;
        }

        let status = tokio::time::timeout(EXIT_TIMEOUT, self.child.wait())
            .await
            .ok()
            .and_then(Result::ok);

        if let Some(line) = first_line(&stderr) {
            return Some(line.to_string());
        }
        match status {
            Some(status) if !status.success() => Some(format!("ssh exited with {status}")),
            _ => None,
        }
    }

    #[cfg(unix)]
    async fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            match tokio::time::timeout(EXIT_TIMEOUT, self.child.wait()).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => self.child.kill().await,
            }
        } else {
            Ok(())
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    /// Exit status, if the process has already exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}

#[async_trait]
impl LineChannel for SshChannel {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.lines.read_line().await? {
            return Ok(Some(line));
        }
        match self.exit_reason().await {
            Some(reason) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, reason)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.lines.close().await?;
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        tracing::debug!("Terminating ssh event stream process");
        self.terminate().await
    }
}
