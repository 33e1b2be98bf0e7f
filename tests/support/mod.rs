//! In-memory stand-in for a Gerrit server.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gerrit_stream::transport::{
    CommandOutput, CommandTransport, LineChannel, ReaderChannel, StreamTransport, TransportError,
};
use gerrit_stream::GerritClient;
use tokio::io::{AsyncWriteExt, DuplexStream};

#[derive(Default)]
pub struct MockServer {
    responses: Mutex<HashMap<String, CommandOutput>>,
    executed: Mutex<Vec<String>>,
    streams: Mutex<VecDeque<Box<dyn LineChannel>>>,
    opened: Mutex<Vec<String>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn client(self: &Arc<Self>) -> GerritClient {
        GerritClient::with_transports(self.clone(), self.clone())
    }

    /// Answer `command` (including the `gerrit` prefix) with `stdout`.
    pub fn respond(&self, command: &str, stdout: &str) {
        self.reply(command, Some(0), stdout, "");
    }

    pub fn reply(&self, command: &str, status: Option<i32>, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            CommandOutput {
                exit_status: status,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Queue a stream for the next `open_stream`; returns its write end.
    pub fn add_stream(&self) -> StreamWriter {
        let (reader, writer) = tokio::io::duplex(64 * 1024);
        self.streams
            .lock()
            .unwrap()
            .push_back(Box::new(ReaderChannel::new(reader)));
        StreamWriter(writer)
    }

    /// Like [`add_stream`](Self::add_stream), but closing the channel never
    /// completes.
    pub fn add_stuck_stream(&self) -> StreamWriter {
        let (reader, writer) = tokio::io::duplex(64 * 1024);
        self.streams
            .lock()
            .unwrap()
            .push_back(Box::new(StuckChannel(ReaderChannel::new(reader))));
        StreamWriter(writer)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for MockServer {
    async fn execute(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.executed.lock().unwrap().push(command.to_string());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput {
                exit_status: Some(1),
                stdout: String::new(),
                stderr: format!("fatal: {command}: not found"),
            }))
    }
}

#[async_trait]
impl StreamTransport for MockServer {
    async fn open_stream(&self, command: &str) -> Result<Box<dyn LineChannel>, TransportError> {
        self.opened.lock().unwrap().push(command.to_string());
        match self.streams.lock().unwrap().pop_front() {
            Some(channel) => Ok(channel),
            None => Err(TransportError::Connect {
                host: "mock".to_string(),
                message: "Connection refused".to_string(),
            }),
        }
    }
}

/// A channel whose remote end ignores hang-ups.
struct StuckChannel(ReaderChannel<DuplexStream>);

#[async_trait]
impl LineChannel for StuckChannel {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.0.read_line().await
    }

    async fn close(&mut self) -> io::Result<()> {
        std::future::pending().await
    }
}

/// Server side of a mock event stream.
pub struct StreamWriter(DuplexStream);

impl StreamWriter {
    pub async fn send(&mut self, line: &str) {
        self.0.write_all(line.as_bytes()).await.unwrap();
        self.0.write_all(b"\n").await.unwrap();
    }

    /// Hang up, as a dropped connection would.
    pub fn close(self) {
        drop(self.0);
    }
}

pub fn comment_added(number: u64, author: &str) -> String {
    serde_json::json!({
        "type": "comment-added",
        "change": {
            "project": "demo",
            "branch": "main",
            "id": "I0123456789abcdef0123456789abcdef01234567",
            "number": number,
            "subject": "Fix the frobnicator",
            "owner": {"name": "Owner Name", "email": "owner@example.com"},
            "url": format!("http://review.example.com/{number}")
        },
        "patchSet": {"number": 2, "revision": "deadbeef", "ref": format!("refs/changes/{}/{number}/2", number % 100)},
        "author": {"name": author, "email": "reviewer@example.com"},
        "approvals": [{"type": "Code-Review", "description": "Code-Review", "value": "1"}],
        "comment": "Looks good",
        "eventCreatedOn": 1_700_000_000
    })
    .to_string()
}
