//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stream::{OverflowPolicy, QueueConfig};
use crate::transport::{SshTarget, DEFAULT_SSH_BINARY, DEFAULT_SSH_PORT};

/// Top-level client configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub ssh: SshConfig,
    pub stream: StreamConfig,
    pub rest: RestConfig,
}

/// How to reach the server's ssh command interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Host name or `~/.ssh/config` alias.
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub identity_file: Option<PathBuf>,
    /// Seconds between keepalive probes; unset disables them.
    pub keepalive_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    /// Program used to open sessions.
    pub binary: String,
    /// Extra `-o` options passed through verbatim.
    pub extra_options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: Some(DEFAULT_SSH_PORT),
            username: None,
            identity_file: None,
            keepalive_secs: None,
            connect_timeout_secs: None,
            binary: DEFAULT_SSH_BINARY.to_string(),
            extra_options: Vec::new(),
        }
    }
}

impl SshConfig {
    /// Build the ssh invocation target described by this section.
    #[must_use]
    pub fn target(&self) -> SshTarget {
        let mut target = SshTarget::new(&self.host).binary(&self.binary);
        if let Some(port) = self.port {
            target = target.port(port);
        }
        if let Some(username) = &self.username {
            target = target.username(username);
        }
        if let Some(path) = &self.identity_file {
            target = target.identity_file(path);
        }
        if let Some(secs) = self.keepalive_secs.filter(|secs| *secs > 0) {
            target = target.keepalive(Duration::from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout_secs.filter(|secs| *secs > 0) {
            target = target.connect_timeout(Duration::from_secs(secs));
        }
        for option in &self.extra_options {
            target = target.option(option);
        }
        target
    }
}

/// Event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Remote command that produces the event stream.
    pub command: String,
    /// Maximum queued events; 0 means unbounded.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub push_timeout_ms: u64,
    /// How long a stop waits for the worker before abandoning it.
    pub stop_timeout_ms: u64,
}

fn default_stream_command() -> String {
    "gerrit stream-events".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            command: default_stream_command(),
            capacity: 0,
            overflow: OverflowPolicy::Block,
            push_timeout_ms: 5000,
            stop_timeout_ms: 5000,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        let config = if self.capacity == 0 {
            QueueConfig::default()
        } else {
            QueueConfig::bounded(self.capacity, self.overflow)
        };
        config.with_push_timeout(Duration::from_millis(self.push_timeout_ms))
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// REST endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestConfig {
    /// Base URL of the server, e.g. `https://review.example.org/`.
    pub url: Option<String>,
    pub username: Option<String>,
    /// Environment variable holding the HTTP password.
    pub password_env: String,
    pub timeout_secs: u64,
}

fn default_password_env() -> String {
    "GERRIT_HTTP_PASSWORD".to_string()
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password_env: default_password_env(),
            timeout_secs: 30,
        }
    }
}

impl RestConfig {
    /// Read the password from the configured environment variable.
    #[must_use]
    pub fn password(&self) -> Option<String> {
        std::env::var(&self.password_env).ok()
    }
}
