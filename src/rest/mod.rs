//! Gerrit REST API access and review helpers.

mod client;
mod review;

pub use client::*;
pub use review::*;
