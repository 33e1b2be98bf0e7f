//! Event model and decoder tests.

mod decoder_test;

/// Verify the event types are exported from the library root.
#[test]
fn test_event_types_exported() {
    use gerrit_stream::events::{kind, EventBody, EventDecoder, RegistryError};

    let decoder = EventDecoder::default();
    assert!(decoder.is_known(kind::COMMENT_ADDED));
    let _: fn(String) -> RegistryError = RegistryError::DuplicateKind;
    let _ = EventBody::Unknown;
}
