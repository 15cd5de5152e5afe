//! # Wire Envelope
//!
//! The envelope is the unit exchanged on a channel. Two kinds exist: an
//! [`EnvelopeKind::Event`] carries an event name and its arguments, an
//! [`EnvelopeKind::Ack`] carries the reply arguments for a previously
//! published event. The optional `id` field links the two: an ack answers
//! the event that carried the same correlation ID.
//!
//! The wire format is a self-describing JSON object:
//!
//! ```text
//! { "type": "event" | "ack", "data": [ ... ], "id"?: integer }
//! ```
//!
//! `id` is omitted entirely when no reply is expected. `0` is a valid
//! correlation ID, so decoding keeps "absent" and "zero" distinct through
//! `Option<u64>`. The contents of `data` are opaque application payload and
//! are not validated here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::CorrelationId;

/// The two message kinds exchanged on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// An application event: `data[0]` is the event name, `data[1..]` the arguments.
    Event,
    /// A reply to an event: `data` is the full reply argument list.
    Ack,
}

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind, serialized as the `type` field.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Ordered payload values.
    pub data: Vec<Value>,
    /// Correlation ID; present iff the sender expects (Event) or is
    /// fulfilling (Ack) a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
}

impl Envelope {
    /// Builds an event envelope with no reply expected.
    pub fn event(data: Vec<Value>) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            data,
            id: None,
        }
    }

    /// Builds an event envelope that requests a reply correlated by `id`.
    pub fn event_with_reply(data: Vec<Value>, id: CorrelationId) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            data,
            id: Some(id),
        }
    }

    /// Builds an ack envelope answering the event that carried `id`.
    pub fn ack(id: CorrelationId, data: Vec<Value>) -> Self {
        Self {
            kind: EnvelopeKind::Ack,
            data,
            id: Some(id),
        }
    }

    /// Serializes the envelope to its wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Parses an envelope from wire bytes.
    ///
    /// Tolerates an absent or `null` `id` and keeps it distinct from `id = 0`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    #[error("malformed envelope: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::event_with_reply(vec![json!("greet"), json!("hi")], 7);
        let encoded = envelope.encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(raw, json!({"type": "event", "data": ["greet", "hi"], "id": 7}));
    }

    #[test]
    fn test_id_omitted_when_absent() {
        let envelope = Envelope::event(vec![json!("greet")]);
        let encoded = envelope.encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(raw, json!({"type": "event", "data": ["greet"]}));
    }

    #[test]
    fn test_decode_absent_and_null_id() {
        let absent = Envelope::decode(br#"{"type":"event","data":["x"]}"#).unwrap();
        assert_eq!(absent.id, None);

        let null = Envelope::decode(br#"{"type":"event","data":["x"],"id":null}"#).unwrap();
        assert_eq!(null.id, None);
    }

    #[test]
    fn test_zero_is_a_valid_id() {
        let envelope = Envelope::ack(0, vec![]);
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.id, Some(0));
        assert_ne!(decoded.id, None);
    }

    #[test]
    fn test_roundtrip_boundary_cases() {
        for envelope in [
            Envelope::event(vec![]),
            Envelope::event_with_reply(vec![], 0),
            Envelope::ack(0, vec![]),
            Envelope::ack(u64::MAX, vec![json!(null), json!({"k": [1, 2]})]),
        ] {
            let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"type":"nope","data":[]}"#).is_err());
        assert!(Envelope::decode(br#"{"data":[]}"#).is_err());
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn test_roundtrip(
            data in prop::collection::vec(value_strategy(), 0..8),
            id in prop::option::of(any::<u64>()),
            is_ack in any::<bool>(),
        ) {
            let envelope = Envelope {
                kind: if is_ack { EnvelopeKind::Ack } else { EnvelopeKind::Event },
                data,
                id,
            };
            let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, envelope);
        }
    }
}
