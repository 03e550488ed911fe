//! Text encoding of saga log entries.
//!
//! ## Format
//!
//! ```text
//! id executionId entryType nodeId [sagaName] [jsonData]
//! ```
//!
//! Fields are separated by a single space and absent optional fields are
//! omitted together with their separator. The text is UTF-8.
//!
//! The four mandatory fields never contain spaces. The saga name may, so its
//! end is found by locating the first `{`, which starts the JSON payload and
//! runs to the end of the record. Saga names never contain `{`.

use super::{EntryId, EntryType, SagaLogEntry, SagaLogEntryBuilder, SAGA_NODE_ID};
use thiserror::Error;

/// Errors produced while decoding a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The record is not valid UTF-8.
    #[error("entry is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A mandatory field is missing.
    #[error("entry is missing the {0} field")]
    MissingField(&'static str),

    /// The id is not a canonical decimal `u64`.
    #[error("invalid entry id: {0:?}")]
    InvalidEntryId(String),

    /// The entry type is not one of the known names.
    #[error("unknown entry type: {0:?}")]
    UnknownEntryType(String),

    /// The fields decode but violate the entry invariants.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// Encodes an entry into its on-disk bytes.
#[must_use]
pub fn encode(entry: &SagaLogEntry) -> Vec<u8> {
    let id = entry.id().to_string();
    let mut text = String::with_capacity(
        id.len()
            + entry.execution_id().len()
            + entry.node_id().len()
            + entry.saga_name().map_or(0, |s| s.len() + 1)
            + entry.json_data().map_or(0, |s| s.len() + 1)
            + 24,
    );

    text.push_str(&id);
    text.push(' ');
    text.push_str(entry.execution_id());
    text.push(' ');
    text.push_str(entry.entry_type().as_str());
    text.push(' ');
    text.push_str(entry.node_id());
    if let Some(saga_name) = entry.saga_name() {
        text.push(' ');
        text.push_str(saga_name);
    }
    if let Some(json_data) = entry.json_data() {
        text.push(' ');
        text.push_str(json_data);
    }

    text.into_bytes()
}

/// Decodes an entry from its on-disk bytes.
///
/// # Errors
///
/// Returns a [`CodecError`] if the bytes are not a well-formed entry.
pub fn decode(bytes: &[u8]) -> Result<SagaLogEntry, CodecError> {
    let text = std::str::from_utf8(bytes)?;

    let (id, rest) = text
        .split_once(' ')
        .ok_or(CodecError::MissingField("execution id"))?;
    let (execution_id, rest) = rest
        .split_once(' ')
        .ok_or(CodecError::MissingField("entry type"))?;
    let (entry_type, rest) = rest
        .split_once(' ')
        .ok_or(CodecError::MissingField("node id"))?;

    let builder = SagaLogEntryBuilder::new()
        .id(id.parse::<EntryId>()?)
        .execution_id(execution_id)
        .entry_type(entry_type.parse::<EntryType>()?);

    let builder = match rest.split_once(' ') {
        None => builder.node_id(rest),
        Some((node_id, optional)) if node_id == SAGA_NODE_ID => {
            decode_saga_scoped(builder.node_id(node_id), optional)?
        }
        Some((node_id, optional)) => {
            let builder = builder.node_id(node_id);
            match optional.find('{') {
                None => builder,
                Some(start) => builder.json_data(&optional[start..]),
            }
        }
    };

    builder.try_build().map_err(CodecError::InvalidEntry)
}

/// Splits the text after a saga-scoped node id into saga name and payload.
///
/// Without a `{` the whole remainder is the saga name.
fn decode_saga_scoped(
    builder: SagaLogEntryBuilder,
    optional: &str,
) -> Result<SagaLogEntryBuilder, CodecError> {
    match optional.find('{') {
        None => Ok(builder.saga_name(optional)),
        Some(0) => Ok(builder.json_data(optional)),
        Some(start) => {
            let saga_name = optional[..start].strip_suffix(' ').ok_or_else(|| {
                CodecError::InvalidEntry("saga name is not followed by a space".into())
            })?;
            Ok(builder.saga_name(saga_name).json_data(&optional[start..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(builder: SagaLogEntryBuilder) -> SagaLogEntry {
        builder.id(EntryId::new(42)).build().unwrap()
    }

    fn assert_round_trip(e: &SagaLogEntry) {
        let bytes = encode(e);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(&decoded, e);
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn encodes_in_field_order() {
        let b = SagaLogEntryBuilder::new;
        assert_eq!(
            encode(&entry(b().start_saga("ex-1", "Some-test-saga", "{}"))),
            b"42 ex-1 StartSaga S Some-test-saga {}"
        );
        assert_eq!(encode(&entry(b().end_saga("ex-1"))), b"42 ex-1 EndSaga S");
        assert_eq!(
            encode(&entry(b().end_action("ex-1", "a1", r#"{"x": 1}"#))),
            br#"42 ex-1 EndAction a1 {"x": 1}"#
        );
    }

    #[test]
    fn round_trips_every_builder() {
        let b = SagaLogEntryBuilder::new;
        for builder in [
            b().start_saga("ex-1234", "Some-test-saga", "{}"),
            b().start_saga("ex-1234", "Saga Name With Spaces", "{}"),
            b().end_saga("ex-1234"),
            b().start_action("ex-1234", "abc-Start-Action"),
            b().end_action("ex-1234", "abc-End-Action", "{}"),
            b().abort("ex-1234", "abc-Abort"),
            b().abort("ex-1234", SAGA_NODE_ID),
            b().comp_done("ex-1234", "abc-Comp-Done"),
        ] {
            assert_round_trip(&entry(builder));
        }
    }

    #[test]
    fn saga_name_without_payload_keeps_every_byte() {
        let e = entry(
            SagaLogEntryBuilder::new()
                .entry_type(EntryType::StartSaga)
                .execution_id("ex-1")
                .node_id(SAGA_NODE_ID)
                .saga_name("Vanilla Saga"),
        );
        assert_eq!(encode(&e), b"42 ex-1 StartSaga S Vanilla Saga");
        assert_eq!(decode(&encode(&e)).unwrap().saga_name(), Some("Vanilla Saga"));
    }

    #[test]
    fn saga_name_edge_spacing_round_trips() {
        let b = SagaLogEntryBuilder::new;
        assert_round_trip(&entry(b().start_saga("ex-1", "", "{}")));
        assert_round_trip(&entry(b().start_saga("ex-1", "trailing ", "{}")));
        assert_round_trip(&entry(b().start_saga("ex-1", " leading", r#"{"a":{"b":2}}"#)));
    }

    #[test]
    fn payload_with_spaces_and_braces_round_trips() {
        let e = entry(SagaLogEntryBuilder::new().end_action(
            "ex-1",
            "a1",
            r#"{"message": "hello world", "nested": {"k": "{v}"}}"#,
        ));
        assert_round_trip(&e);
    }

    #[test]
    fn action_scoped_text_without_brace_is_ignored() {
        let e = decode(b"7 ex-1 StartAction a1 trailing words").unwrap();
        assert_eq!(e.node_id(), "a1");
        assert_eq!(e.json_data(), None);
    }

    #[test]
    fn rejects_malformed_records() {
        assert_eq!(
            decode(b"7 ex-1 StartAction"),
            Err(CodecError::MissingField("node id"))
        );
        assert_eq!(decode(b"7"), Err(CodecError::MissingField("execution id")));
        assert!(matches!(
            decode(b"x ex-1 EndSaga S"),
            Err(CodecError::InvalidEntryId(_))
        ));
        assert!(matches!(
            decode(b"7 ex-1 Finish S"),
            Err(CodecError::UnknownEntryType(_))
        ));
        assert!(matches!(
            decode(&[0x37, 0x20, 0xff, 0xfe]),
            Err(CodecError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn rejects_records_violating_invariants() {
        // StartSaga without a saga name.
        assert!(matches!(
            decode(b"7 ex-1 StartSaga S {}"),
            Err(CodecError::InvalidEntry(_))
        ));
        // Saga-scoped node on an action entry.
        assert!(matches!(
            decode(b"7 ex-1 StartAction S"),
            Err(CodecError::InvalidEntry(_))
        ));
        // Saga name glued to the payload.
        assert!(matches!(
            decode(b"7 ex-1 StartSaga S name{}"),
            Err(CodecError::InvalidEntry(_))
        ));
    }

    fn token() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.:$-]{1,16}"
    }

    fn json() -> impl Strategy<Value = String> {
        "\\{[ -~]{0,32}\\}"
    }

    fn action() -> impl Strategy<Value = String> {
        token().prop_filter("action node", |n| n != SAGA_NODE_ID)
    }

    fn any_entry() -> impl Strategy<Value = SagaLogEntry> {
        let b = SagaLogEntryBuilder::new;
        let builder = prop_oneof![
            (token(), "[^{]{0,24}", json()).prop_map(move |(x, n, j)| b().start_saga(x, n, j)),
            token().prop_map(move |x| b().end_saga(x)),
            (token(), action()).prop_map(move |(x, n)| b().start_action(x, n)),
            (token(), action(), json()).prop_map(move |(x, n, j)| b().end_action(x, n, j)),
            (token(), token()).prop_map(move |(x, n)| b().abort(x, n)),
            (token(), action()).prop_map(move |(x, n)| b().comp_done(x, n)),
        ];
        (builder, any::<u64>()).prop_map(|(builder, id)| builder.id(EntryId::new(id)).build().unwrap())
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(e in any_entry()) {
            let bytes = encode(&e);
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(&decoded, &e);
            prop_assert_eq!(encode(&decoded), bytes);
        }
    }
}
