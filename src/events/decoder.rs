//! Line decoder: one line of stream output in, one [`Event`] out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::kinds::{kind, CustomEvent, Event, EventBody};

/// Builds a typed body from the raw record.
type Constructor = Arc<dyn Fn(&Map<String, Value>) -> EventBody + Send + Sync>;

/// A line that could not be decoded as a JSON object.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to decode event line: {reason}: [{line}]")]
pub struct DecodeError {
    /// The offending line, as read.
    pub line: String,
    pub reason: String,
}

/// Errors from registering custom event kinds.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate event kind: {0}")]
    DuplicateKind(String),
}

/// Maps discriminator strings to body constructors.
///
/// Built-in Gerrit kinds are registered on construction. Anything else
/// decodes to [`EventBody::Unknown`] with the raw record preserved.
#[derive(Clone)]
pub struct EventDecoder {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for EventDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("EventDecoder").field("kinds", &kinds).finish()
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin(body: fn(&Map<String, Value>) -> EventBody) -> Constructor {
    Arc::new(body)
}

impl EventDecoder {
    /// Create a decoder that knows the standard Gerrit event kinds.
    #[must_use]
    pub fn new() -> Self {
        let entries: [(&str, Constructor); 11] = [
            (
                kind::PATCHSET_CREATED,
                builtin(|raw| EventBody::PatchsetCreated(EventBody::project(raw))),
            ),
            (
                kind::DRAFT_PUBLISHED,
                builtin(|raw| EventBody::DraftPublished(EventBody::project(raw))),
            ),
            (
                kind::COMMENT_ADDED,
                builtin(|raw| EventBody::CommentAdded(EventBody::project(raw))),
            ),
            (
                kind::CHANGE_MERGED,
                builtin(|raw| EventBody::ChangeMerged(EventBody::project(raw))),
            ),
            (
                kind::MERGE_FAILED,
                builtin(|raw| EventBody::MergeFailed(EventBody::project(raw))),
            ),
            (
                kind::CHANGE_ABANDONED,
                builtin(|raw| EventBody::ChangeAbandoned(EventBody::project(raw))),
            ),
            (
                kind::CHANGE_RESTORED,
                builtin(|raw| EventBody::ChangeRestored(EventBody::project(raw))),
            ),
            (
                kind::REF_UPDATED,
                builtin(|raw| EventBody::RefUpdated(EventBody::project(raw))),
            ),
            (
                kind::REVIEWER_ADDED,
                builtin(|raw| EventBody::ReviewerAdded(EventBody::project(raw))),
            ),
            (
                kind::TOPIC_CHANGED,
                builtin(|raw| EventBody::TopicChanged(EventBody::project(raw))),
            ),
            (
                kind::ERROR_EVENT,
                builtin(|raw| EventBody::StreamError(EventBody::project(raw))),
            ),
        ];

        Self {
            constructors: entries
                .into_iter()
                .map(|(name, ctor)| (name.to_string(), ctor))
                .collect(),
        }
    }

    /// Register a caller-defined kind.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateKind` if `name` is already known,
    /// built-in or custom.
    pub fn register<T, F>(&mut self, name: impl Into<String>, build: F) -> Result<(), RegistryError>
    where
        T: CustomEvent,
        F: Fn(&Map<String, Value>) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(RegistryError::DuplicateKind(name));
        }
        tracing::debug!(kind = %name, "Registered custom event kind");
        let constructor: Constructor = Arc::new(move |raw: &Map<String, Value>| {
            EventBody::Custom(Arc::new(build(raw)))
        });
        self.constructors.insert(name, constructor);
        Ok(())
    }

    /// Returns true if `name` decodes to something other than `Unknown`.
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Decode one line of stream output.
    ///
    /// Blank lines yield `Ok(None)`. A JSON object with a missing or
    /// unregistered `type` decodes to an [`EventBody::Unknown`] event.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the line is not valid JSON or is not a JSON
    /// object.
    pub fn decode(&self, line: &str) -> Result<Option<Event>, DecodeError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(trimmed).map_err(|e| DecodeError {
            line: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        let Value::Object(raw) = value else {
            return Err(DecodeError {
                line: trimmed.to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };

        Ok(Some(self.decode_object(raw)))
    }

    /// Classify an already-parsed record.
    #[must_use]
    pub fn decode_object(&self, raw: Map<String, Value>) -> Event {
        let name = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let body = match self.constructors.get(&name) {
            Some(build) => build(&raw),
            None => {
                tracing::debug!(kind = %name, "Unhandled event kind");
                EventBody::Unknown
            }
        };

        Event::new(name, raw, body)
    }
}
