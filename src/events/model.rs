//! Typed projections of the objects Gerrit nests inside event records.
//!
//! Every field is optional. A record missing a field, or carrying it with an
//! unexpected shape, leaves the field unset instead of failing the decode.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Deserialize an optional nested entity, discarding values of the wrong shape.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Deserialize a list, keeping only the elements that project cleanly.
pub(crate) fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Deserialize an integer that older servers send as a string.
pub(crate) fn flex_int<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(int_from_value(&value).and_then(|n| T::try_from(n).ok()))
}

/// An integer sent either as a JSON number or as a numeric string.
pub(crate) fn int_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().trim_start_matches('+').parse::<i64>().ok(),
        _ => None,
    }
}

/// Convert Gerrit's epoch-seconds timestamps.
fn epoch(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// A Gerrit user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A change under review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    /// The `Change-Id` footer value.
    #[serde(default, rename = "id")]
    pub change_id: Option<String>,
    /// Numeric change number.
    #[serde(default, deserialize_with = "flex_int")]
    pub number: Option<u64>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub owner: Option<Account>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default, deserialize_with = "flex_int")]
    pub created_on: Option<i64>,
    #[serde(default, deserialize_with = "flex_int")]
    pub last_updated: Option<i64>,
    /// Populated by queries run with `--current-patch-set`.
    #[serde(default, deserialize_with = "lenient")]
    pub current_patch_set: Option<Patchset>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub comments: Vec<Comment>,
}

impl Change {
    /// When the change was created.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        epoch(self.created_on)
    }

    /// When the change was last updated.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        epoch(self.last_updated)
    }
}

/// One revision of a change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patchset {
    /// Sequence number within the change.
    #[serde(default, deserialize_with = "flex_int")]
    pub number: Option<u64>,
    /// Commit hash.
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub uploader: Option<Account>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<Account>,
    #[serde(default, deserialize_with = "flex_int")]
    pub created_on: Option<i64>,
    #[serde(default)]
    pub is_draft: Option<bool>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub approvals: Vec<Approval>,
}

impl Patchset {
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        epoch(self.created_on)
    }
}

/// A label vote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// Label name, e.g. `Code-Review` (`CRVW` on old servers).
    #[serde(default, rename = "type")]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flex_int")]
    pub value: Option<i32>,
    #[serde(default, deserialize_with = "flex_int")]
    pub granted_on: Option<i64>,
    /// The reviewer who voted.
    #[serde(default, deserialize_with = "lenient")]
    pub by: Option<Account>,
}

impl Approval {
    #[must_use]
    pub fn granted_at(&self) -> Option<DateTime<Utc>> {
        epoch(self.granted_on)
    }
}

/// A review message attached to a change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, deserialize_with = "flex_int")]
    pub timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub reviewer: Option<Account>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Comment {
    #[must_use]
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        epoch(self.timestamp)
    }
}

/// A ref moving from one revision to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdate {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub old_rev: Option<String>,
    #[serde(default)]
    pub new_rev: Option<String>,
    #[serde(default)]
    pub ref_name: Option<String>,
}
