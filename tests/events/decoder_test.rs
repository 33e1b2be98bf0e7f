//! Decoding real-shaped `stream-events` records.

use gerrit_stream::events::{kind, EventBody, EventDecoder, RegistryError};
use serde_json::{json, Map, Value};

use crate::support::comment_added;

fn change() -> Value {
    json!({
        "project": "project-name",
        "branch": "branch-name",
        "topic": "topic-name",
        "id": "Ideadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        "number": "123456",
        "subject": "Commit message subject",
        "owner": {"name": "Owner Name", "email": "owner@example.com"},
        "url": "http://review.example.com/123456"
    })
}

fn patchset() -> Value {
    json!({
        "number": "4",
        "revision": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        "ref": "refs/changes/56/123456/4",
        "uploader": {"name": "Uploader Name", "email": "uploader@example.com"},
        "createdOn": 1_254_820_000
    })
}

fn decode(value: &Value) -> gerrit_stream::Event {
    EventDecoder::new()
        .decode(&value.to_string())
        .expect("valid line")
        .expect("non-blank line")
}

#[test]
fn patchset_created() {
    let event = decode(&json!({
        "type": "patchset-created",
        "change": change(),
        "patchSet": patchset(),
        "uploader": {"name": "Uploader Name", "email": "uploader@example.com"}
    }));

    let EventBody::PatchsetCreated(body) = event.body() else {
        panic!("expected PatchsetCreated, got {:?}", event.body());
    };
    let change = body.change.as_ref().unwrap();
    assert_eq!(change.project.as_deref(), Some("project-name"));
    assert_eq!(change.branch.as_deref(), Some("branch-name"));
    assert_eq!(change.topic.as_deref(), Some("topic-name"));
    assert_eq!(
        change.change_id.as_deref(),
        Some("Ideadbeefdeadbeefdeadbeefdeadbeefdeadbeef")
    );
    assert_eq!(change.number, Some(123_456));
    assert_eq!(change.owner.as_ref().unwrap().name.as_deref(), Some("Owner Name"));

    let patchset = body.patchset.as_ref().unwrap();
    assert_eq!(patchset.number, Some(4));
    assert_eq!(patchset.ref_name.as_deref(), Some("refs/changes/56/123456/4"));
    assert_eq!(patchset.created_at().unwrap().timestamp(), 1_254_820_000);
    assert_eq!(
        body.uploader.as_ref().unwrap().email.as_deref(),
        Some("uploader@example.com")
    );
    assert_eq!(event.to_string(), "<patchset-created project-name #123456,4>");
}

#[test]
fn draft_published_shares_patchset_shape() {
    let event = decode(&json!({
        "type": "draft-published",
        "change": change(),
        "patchSet": patchset(),
        "uploader": {"name": "Uploader Name"}
    }));

    assert!(matches!(event.body(), EventBody::DraftPublished(_)));
    assert_eq!(event.patchset().unwrap().number, Some(4));
}

#[test]
fn comment_added_with_approvals() {
    let event = EventDecoder::new()
        .decode(&comment_added(123, "Bob"))
        .unwrap()
        .unwrap();

    let EventBody::CommentAdded(body) = event.body() else {
        panic!("expected CommentAdded");
    };
    assert_eq!(event.change().unwrap().number, Some(123));
    assert_eq!(body.author.as_ref().unwrap().name.as_deref(), Some("Bob"));
    assert_eq!(body.comment.as_deref(), Some("Looks good"));
    assert_eq!(body.approvals.len(), 1);
    assert_eq!(body.approvals[0].category.as_deref(), Some("Code-Review"));
    assert_eq!(body.approvals[0].value, Some(1));
    assert_eq!(event.created_at().unwrap().timestamp(), 1_700_000_000);
}

#[test]
fn minimal_comment_added() {
    let event = EventDecoder::new()
        .decode(r#"{"type":"comment-added","change":{"project":"foo","number":123},"author":{"name":"Bob"}}"#)
        .unwrap()
        .unwrap();

    let EventBody::CommentAdded(body) = event.body() else {
        panic!("expected CommentAdded");
    };
    let change = body.change.as_ref().unwrap();
    assert_eq!(change.project.as_deref(), Some("foo"));
    assert_eq!(change.number, Some(123));
    assert_eq!(body.author.as_ref().unwrap().name.as_deref(), Some("Bob"));
    assert!(body.patchset.is_none());
    assert!(body.approvals.is_empty());
}

#[test]
fn merged_abandoned_restored() {
    let merged = decode(&json!({
        "type": "change-merged",
        "change": change(),
        "patchSet": patchset(),
        "submitter": {"name": "Submitter Name"}
    }));
    let EventBody::ChangeMerged(body) = merged.body() else {
        panic!("expected ChangeMerged");
    };
    assert_eq!(body.submitter.as_ref().unwrap().name.as_deref(), Some("Submitter Name"));

    let abandoned = decode(&json!({
        "type": "change-abandoned",
        "change": change(),
        "abandoner": {"name": "Abandoner Name", "email": "abandoner@example.com"},
        "reason": "Abandon reason"
    }));
    let EventBody::ChangeAbandoned(body) = abandoned.body() else {
        panic!("expected ChangeAbandoned");
    };
    assert_eq!(body.reason.as_deref(), Some("Abandon reason"));
    assert_eq!(
        body.abandoner.as_ref().unwrap().email.as_deref(),
        Some("abandoner@example.com")
    );

    let restored = decode(&json!({
        "type": "change-restored",
        "change": change(),
        "restorer": {"name": "Restorer Name"},
        "reason": "Restore reason"
    }));
    let EventBody::ChangeRestored(body) = restored.body() else {
        panic!("expected ChangeRestored");
    };
    assert_eq!(body.restorer.as_ref().unwrap().name.as_deref(), Some("Restorer Name"));
    assert_eq!(body.reason.as_deref(), Some("Restore reason"));
}

#[test]
fn merge_failed_carries_reason() {
    let event = decode(&json!({
        "type": "merge-failed",
        "change": change(),
        "patchSet": patchset(),
        "submitter": {"name": "Submitter Name"},
        "reason": "Merge conflict"
    }));
    let EventBody::MergeFailed(body) = event.body() else {
        panic!("expected MergeFailed");
    };
    assert_eq!(body.reason.as_deref(), Some("Merge conflict"));
}

#[test]
fn ref_updated() {
    let event = decode(&json!({
        "type": "ref-updated",
        "submitter": {"name": "Submitter Name", "email": "submitter@example.com"},
        "refUpdate": {
            "oldRev": "0000000000000000000000000000000000000000",
            "newRev": "c44696b39edd5e1e6c9ba2e89cf5db3e5e0e9b6d",
            "refName": "master",
            "project": "project-name"
        }
    }));
    let EventBody::RefUpdated(body) = event.body() else {
        panic!("expected RefUpdated");
    };
    let update = body.ref_update.as_ref().unwrap();
    assert_eq!(update.project.as_deref(), Some("project-name"));
    assert_eq!(update.ref_name.as_deref(), Some("master"));
    assert_eq!(
        update.old_rev.as_deref(),
        Some("0000000000000000000000000000000000000000")
    );
    assert!(event.change().is_none());
}

#[test]
fn reviewer_added_and_topic_changed() {
    let added = decode(&json!({
        "type": "reviewer-added",
        "change": change(),
        "patchSet": patchset(),
        "reviewer": {"name": "Reviewer Name", "email": "reviewer@example.com"}
    }));
    let EventBody::ReviewerAdded(body) = added.body() else {
        panic!("expected ReviewerAdded");
    };
    assert_eq!(body.reviewer.as_ref().unwrap().name.as_deref(), Some("Reviewer Name"));

    let topic = decode(&json!({
        "type": "topic-changed",
        "change": change(),
        "changer": {"name": "Changer Name"},
        "oldTopic": "old-topic"
    }));
    let EventBody::TopicChanged(body) = topic.body() else {
        panic!("expected TopicChanged");
    };
    assert_eq!(body.old_topic(), "old-topic");

    let no_old_topic = decode(&json!({"type": "topic-changed", "change": change()}));
    let EventBody::TopicChanged(body) = no_old_topic.body() else {
        panic!("expected TopicChanged");
    };
    assert_eq!(body.old_topic(), "");
}

#[test]
fn unknown_kind_keeps_raw_record() {
    let value = json!({"type": "custom-thing", "x": 1});
    let event = decode(&value);

    assert!(event.is_unknown());
    assert_eq!(event.kind(), "custom-thing");
    assert_eq!(Value::Object(event.raw().clone()), value);
    assert_eq!(event.to_string(), "<unhandled event: custom-thing>");
}

#[test]
fn missing_type_is_unknown_with_empty_kind() {
    let event = decode(&json!({"change": change()}));
    assert!(event.is_unknown());
    assert_eq!(event.kind(), "");
}

#[test]
fn malformed_payload_still_decodes() {
    let event = decode(&json!({
        "type": "comment-added",
        "change": "not an object",
        "author": {"name": "Alice"},
        "approvals": [{"type": "Verified", "value": "-1"}, 7]
    }));
    let EventBody::CommentAdded(body) = event.body() else {
        panic!("expected CommentAdded");
    };
    assert!(body.change.is_none());
    assert_eq!(body.author.as_ref().unwrap().name.as_deref(), Some("Alice"));
    assert_eq!(body.approvals.len(), 1);
    assert_eq!(body.approvals[0].value, Some(-1));
}

#[test]
fn invalid_lines_fail_with_the_offending_text() {
    let decoder = EventDecoder::new();

    let err = decoder.decode("not json").unwrap_err();
    assert_eq!(err.line, "not json");
    assert!(err.to_string().contains("[not json]"));

    assert!(decoder.decode("[1, 2]").is_err());
    assert!(decoder.decode("   ").unwrap().is_none());
}

#[derive(Debug, PartialEq)]
struct UserDefined {
    title: String,
    description: String,
}

fn user_defined(raw: &Map<String, Value>) -> UserDefined {
    let field = |name: &str| {
        raw.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    UserDefined {
        title: field("title"),
        description: field("description"),
    }
}

#[test]
fn custom_kind_registration() {
    let mut decoder = EventDecoder::new();
    decoder
        .register("user-defined-event", user_defined)
        .unwrap();

    let event = decoder
        .decode(r#"{"type":"user-defined-event","title":"Event title","description":"Event description"}"#)
        .unwrap()
        .unwrap();

    let custom = event.custom::<UserDefined>().expect("custom payload");
    assert_eq!(custom.title, "Event title");
    assert_eq!(custom.description, "Event description");
    assert!(event.custom::<String>().is_none());
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut decoder = EventDecoder::new();
    decoder.register("user-defined-event", user_defined).unwrap();

    let err = decoder
        .register("user-defined-event", user_defined)
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateKind(ref k) if k == "user-defined-event"));

    assert!(decoder.register(kind::CHANGE_MERGED, user_defined).is_err());
}
