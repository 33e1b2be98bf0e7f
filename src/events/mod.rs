//! Gerrit event model and line decoder.
//!
//! Records from `gerrit stream-events` are newline-delimited JSON objects
//! discriminated by their `type` field.

mod decoder;
mod kinds;
mod model;

pub use decoder::{DecodeError, EventDecoder, RegistryError};
pub use kinds::*;
pub use model::{Account, Approval, Change, Comment, Patchset, RefUpdate};
