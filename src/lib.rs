//! Gerrit Stream - client for a Gerrit server's ssh event stream.
//!
//! The [`client::GerritClient`] facade runs remote commands and manages a
//! background reader that decodes `stream-events` output into typed
//! [`events::Event`]s and queues them for consumers.

pub mod client;
pub mod config;
pub mod events;
pub mod rest;
pub mod stream;
pub mod transport;

pub use client::{ClientError, CommandResult, GerritClient};
pub use events::{Event, EventBody, EventDecoder};
pub use stream::{StreamState, StreamStatsSnapshot};
