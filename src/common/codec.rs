//! Tagged JSON codec for store values
//!
//! Values persisted to the shared store (cache entries, task results) carry
//! a `__type__` tag so envelopes and timestamps survive the round trip.
//! Decoded envelopes come back locked.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::common::envelope::Envelope;

const TYPE_KEY: &str = "__type__";
const TYPE_RESULT: &str = "Result";
const TYPE_DATETIME: &str = "datetime.isoformat";

/// A store value after tag resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    Other(Value),
}

/// Canonical serialization: key-sorted, 2-space indent, trailing newline
pub fn dumps(value: &Value) -> String {
    let mut out = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Tag an envelope for storage
pub fn encode_envelope(envelope: &Envelope) -> Value {
    let mut value = envelope.to_value();
    if let Value::Object(ref mut map) = value {
        map.insert(TYPE_KEY.to_string(), Value::String(TYPE_RESULT.to_string()));
    }
    value
}

/// Tag a timestamp for storage
pub fn encode_datetime(dt: &DateTime<Utc>) -> Value {
    json!({
        TYPE_KEY: TYPE_DATETIME,
        "isoformat": dt.to_rfc3339(),
    })
}

/// Decode a tagged timestamp
pub fn decode_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let map = value.as_object()?;
    if map.get(TYPE_KEY)?.as_str()? != TYPE_DATETIME {
        return None;
    }
    DateTime::parse_from_rfc3339(map.get("isoformat")?.as_str()?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolve the tag on a store value. Untagged values pass through.
pub fn decode(value: Value) -> Decoded {
    if let Value::Object(ref map) = value {
        if map.get(TYPE_KEY).and_then(Value::as_str) == Some(TYPE_RESULT) {
            let mut untagged = map.clone();
            untagged.remove(TYPE_KEY);
            if let Ok(envelope) = serde_json::from_value::<Envelope>(Value::Object(untagged)) {
                return Decoded::Envelope(envelope);
            }
        }
    }
    Decoded::Other(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_tag_roundtrip() {
        let envelope = Envelope::success(json!([1, 2, 3]));
        let tagged = encode_envelope(&envelope);
        assert_eq!(tagged[TYPE_KEY], json!("Result"));

        match decode(tagged) {
            Decoded::Envelope(back) => {
                assert!(back.locked);
                assert_eq!(back.data, envelope.data);
                assert!(back.succeeded());
            }
            Decoded::Other(other) => panic!("expected envelope, got {other}"),
        }
    }

    #[test]
    fn test_untagged_passthrough() {
        let value = json!({"plain": true});
        assert_eq!(decode(value.clone()), Decoded::Other(value));
    }

    #[test]
    fn test_datetime_roundtrip() {
        let now = Utc::now();
        let tagged = encode_datetime(&now);
        let back = decode_datetime(&tagged).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_dumps_trailing_newline() {
        let out = dumps(&json!({"b": 1, "a": 2}));
        assert!(out.ends_with('\n'));
        assert!(out.find("\"a\"").unwrap() < out.find("\"b\"").unwrap());
    }
}
