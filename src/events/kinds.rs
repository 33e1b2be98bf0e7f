//! Event variants emitted by `gerrit stream-events`.
//!
//! An [`Event`] always keeps the raw JSON object it was decoded from; the
//! typed [`EventBody`] is a projection of that object selected by the
//! record's `type` discriminator.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::model::{
    int_from_value, lenient, lenient_list, Account, Approval, Change, Patchset, RefUpdate,
};

/// Discriminator values understood out of the box.
pub mod kind {
    pub const PATCHSET_CREATED: &str = "patchset-created";
    pub const DRAFT_PUBLISHED: &str = "draft-published";
    pub const COMMENT_ADDED: &str = "comment-added";
    pub const CHANGE_MERGED: &str = "change-merged";
    pub const MERGE_FAILED: &str = "merge-failed";
    pub const CHANGE_ABANDONED: &str = "change-abandoned";
    pub const CHANGE_RESTORED: &str = "change-restored";
    pub const REF_UPDATED: &str = "ref-updated";
    pub const REVIEWER_ADDED: &str = "reviewer-added";
    pub const TOPIC_CHANGED: &str = "topic-changed";
    /// Synthesized locally when the stream ends without being stopped.
    pub const ERROR_EVENT: &str = "error-event";
}

/// A new patchset was uploaded (also used for `draft-published`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PatchsetCreated {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub uploader: Option<Account>,
}

/// A reviewer commented, optionally voting.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommentAdded {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<Account>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub approvals: Vec<Approval>,
    #[serde(default, deserialize_with = "lenient")]
    pub comment: Option<String>,
}

/// A change was submitted and merged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeMerged {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub submitter: Option<Account>,
}

/// A submitted change could not be merged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MergeFailed {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub submitter: Option<Account>,
    #[serde(default, deserialize_with = "lenient")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeAbandoned {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub abandoner: Option<Account>,
    #[serde(default, deserialize_with = "lenient")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChangeRestored {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub restorer: Option<Account>,
    #[serde(default, deserialize_with = "lenient")]
    pub reason: Option<String>,
}

/// A ref was pushed to directly (branch update, tag, ...).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdated {
    #[serde(default, deserialize_with = "lenient")]
    pub ref_update: Option<RefUpdate>,
    #[serde(default, deserialize_with = "lenient")]
    pub submitter: Option<Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReviewerAdded {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, rename = "patchSet", deserialize_with = "lenient")]
    pub patchset: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient")]
    pub reviewer: Option<Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicChanged {
    #[serde(default, deserialize_with = "lenient")]
    pub change: Option<Change>,
    #[serde(default, deserialize_with = "lenient")]
    pub changer: Option<Account>,
    #[serde(default, deserialize_with = "lenient")]
    pub old_topic: Option<String>,
}

impl TopicChanged {
    /// The previous topic; empty when the change had none.
    #[must_use]
    pub fn old_topic(&self) -> &str {
        self.old_topic.as_deref().unwrap_or_default()
    }
}

/// The stream ended without being asked to stop.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamError {
    #[serde(default)]
    pub error: String,
}

/// A caller-defined event produced by a kind registered on the decoder.
///
/// Implemented for every `Debug + Send + Sync + 'static` type.
pub trait CustomEvent: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> CustomEvent for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed payload of an event, selected by its discriminator.
#[derive(Debug, Clone)]
pub enum EventBody {
    PatchsetCreated(PatchsetCreated),
    DraftPublished(PatchsetCreated),
    CommentAdded(CommentAdded),
    ChangeMerged(ChangeMerged),
    MergeFailed(MergeFailed),
    ChangeAbandoned(ChangeAbandoned),
    ChangeRestored(ChangeRestored),
    RefUpdated(RefUpdated),
    ReviewerAdded(ReviewerAdded),
    TopicChanged(TopicChanged),
    StreamError(StreamError),
    /// Produced by a registered custom kind.
    Custom(Arc<dyn CustomEvent>),
    /// Kind missing or not registered; only `raw` carries data.
    Unknown,
}

impl EventBody {
    /// Project `raw` onto the payload type `T`, leaving fields unset on mismatch.
    pub(crate) fn project<T>(raw: &Map<String, Value>) -> T
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        serde_json::from_value(Value::Object(raw.clone())).unwrap_or_default()
    }
}

/// One decoded record from the event stream.
#[derive(Debug, Clone)]
pub struct Event {
    kind: String,
    raw: Map<String, Value>,
    body: EventBody,
}

impl Event {
    pub(crate) fn new(kind: String, raw: Map<String, Value>, body: EventBody) -> Self {
        Self { kind, raw, body }
    }

    /// Build the sentinel pushed when the stream dies on its own.
    #[must_use]
    pub fn stream_error(message: impl Into<String>) -> Self {
        let error = message.into();
        let mut raw = Map::new();
        raw.insert("type".to_string(), Value::from(kind::ERROR_EVENT));
        raw.insert("error".to_string(), Value::from(error.clone()));
        Self::new(
            kind::ERROR_EVENT.to_string(),
            raw,
            EventBody::StreamError(StreamError { error }),
        )
    }

    /// The `type` discriminator; empty when the record had none.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The record exactly as received.
    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    #[must_use]
    pub fn body(&self) -> &EventBody {
        &self.body
    }

    #[must_use]
    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self.body, EventBody::Unknown)
    }

    /// Returns true for the local end-of-stream sentinel.
    #[must_use]
    pub fn is_stream_error(&self) -> bool {
        matches!(self.body, EventBody::StreamError(_))
    }

    /// The change this event concerns, if any.
    #[must_use]
    pub fn change(&self) -> Option<&Change> {
        match &self.body {
            EventBody::PatchsetCreated(e) | EventBody::DraftPublished(e) => e.change.as_ref(),
            EventBody::CommentAdded(e) => e.change.as_ref(),
            EventBody::ChangeMerged(e) => e.change.as_ref(),
            EventBody::MergeFailed(e) => e.change.as_ref(),
            EventBody::ChangeAbandoned(e) => e.change.as_ref(),
            EventBody::ChangeRestored(e) => e.change.as_ref(),
            EventBody::ReviewerAdded(e) => e.change.as_ref(),
            EventBody::TopicChanged(e) => e.change.as_ref(),
            _ => None,
        }
    }

    /// The patchset this event concerns, if any.
    #[must_use]
    pub fn patchset(&self) -> Option<&Patchset> {
        match &self.body {
            EventBody::PatchsetCreated(e) | EventBody::DraftPublished(e) => e.patchset.as_ref(),
            EventBody::CommentAdded(e) => e.patchset.as_ref(),
            EventBody::ChangeMerged(e) => e.patchset.as_ref(),
            EventBody::MergeFailed(e) => e.patchset.as_ref(),
            EventBody::ChangeAbandoned(e) => e.patchset.as_ref(),
            EventBody::ChangeRestored(e) => e.patchset.as_ref(),
            EventBody::ReviewerAdded(e) => e.patchset.as_ref(),
            _ => None,
        }
    }

    /// Server-side creation time (`eventCreatedOn`).
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.raw
            .get("eventCreatedOn")
            .and_then(int_from_value)
            .and_then(|s| DateTime::from_timestamp(s, 0))
    }

    /// Downcast a custom payload to its concrete type.
    #[must_use]
    pub fn custom<T: Any>(&self) -> Option<&T> {
        match &self.body {
            EventBody::Custom(custom) => (**custom).as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            EventBody::StreamError(e) => write!(f, "<{}: {}>", self.kind, e.error),
            EventBody::Unknown => write!(f, "<unhandled event: {}>", self.kind),
            _ => {
                write!(f, "<{}", self.kind)?;
                if let Some(change) = self.change() {
                    if let Some(project) = &change.project {
                        write!(f, " {project}")?;
                    }
                    if let Some(number) = change.number {
                        write!(f, " #{number}")?;
                    }
                }
                if let Some(number) = self.patchset().and_then(|p| p.number) {
                    write!(f, ",{number}")?;
                }
                write!(f, ">")
            }
        }
    }
}
