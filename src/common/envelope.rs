//! Canonical call envelope
//!
//! Every operation should return one of these so that the output of
//! services stays consistent. The envelope carries a tri-state success
//! flag: when unset, the call counts as successful iff it produced data.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason auto-filled when a trace is present without one
pub const UNCAUGHT_REASON: &str = "uncaught exception (traceback in service)";

/// Service return template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// Success flag; `None` defaults to "truthy if data present"
    pub result: Option<bool>,
    /// Arbitrary payload
    pub data: Option<Value>,
    /// Human-readable outcome
    pub reason: Option<String>,
    /// Arbitrary diagnostic payload
    pub detail: Option<Value>,
    /// Stack trace, present only for failures
    pub trace: Option<String>,
    /// Set once the envelope has round-tripped through serialization.
    /// Advisory only; nothing enforces immutability.
    pub locked: bool,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful envelope carrying `data`
    pub fn success(data: Value) -> Self {
        Self {
            result: Some(true),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Failure envelope with a reason
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            result: Some(false),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Envelope carrying only a success flag
    pub fn from_flag(result: bool) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self.normalize();
        self
    }

    /// Effective success flag, applying the data-present default
    pub fn succeeded(&self) -> bool {
        self.result.unwrap_or(self.data.is_some())
    }

    /// True if this envelope represents an exception: effective result is
    /// false and a trace is attached
    pub fn is_exception(&self) -> bool {
        !self.succeeded() && self.trace.is_some()
    }

    /// Fill the reason when a trace arrived without one
    fn normalize(&mut self) {
        if self.trace.is_some() && self.reason.is_none() {
            self.reason = Some(UNCAUGHT_REASON.to_string());
        }
    }

    /// Wire form as a JSON value
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Render the wire form: indented, key-sorted, trailing newline
    pub fn render(&self) -> String {
        crate::common::codec::dumps(&self.to_value())
    }
}

impl Serialize for Envelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Wire form always carries all five fields; the effective result
        // is materialized and `locked` stays internal.
        let mut state = serializer.serialize_struct("Envelope", 5)?;
        state.serialize_field("result", &self.succeeded())?;
        state.serialize_field("reason", &self.reason)?;
        state.serialize_field("data", &self.data)?;
        state.serialize_field("detail", &self.detail)?;
        state.serialize_field("trace", &self.trace)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(default)]
            result: Option<bool>,
            #[serde(default)]
            reason: Option<String>,
            #[serde(default)]
            data: Option<Value>,
            #[serde(default)]
            detail: Option<Value>,
            #[serde(default)]
            trace: Option<String>,
        }

        let wire = Wire::deserialize(deserializer)?;
        let mut envelope = Envelope {
            result: wire.result,
            data: wire.data,
            reason: wire.reason,
            detail: wire.detail,
            trace: wire.trace,
            locked: true,
        };
        envelope.normalize();
        Ok(envelope)
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_exception() {
            let last_line = self
                .trace
                .as_deref()
                .unwrap_or("")
                .trim()
                .lines()
                .last()
                .unwrap_or("");
            write!(f, "<Envelope(result={}, exception={})>", self.succeeded(), last_line)
        } else {
            let mut short = self
                .data
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "null".to_string());
            if short.chars().count() > 30 {
                short = short.chars().take(27).collect();
                short.push_str("...");
            }
            write!(f, "<Envelope(result={}, data={})>", self.succeeded(), short)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_result_from_data() {
        let envelope = Envelope::new().with_data(json!({"x": 1}));
        assert_eq!(envelope.result, None);
        assert!(envelope.succeeded());

        let empty = Envelope::new();
        assert!(!empty.succeeded());
    }

    #[test]
    fn test_explicit_result_wins() {
        let envelope = Envelope {
            result: Some(false),
            data: Some(json!(1)),
            ..Envelope::default()
        };
        assert!(!envelope.succeeded());
    }

    #[test]
    fn test_trace_fills_reason() {
        let envelope = Envelope {
            result: Some(false),
            ..Envelope::default()
        }
        .with_trace("boom at line 3");
        assert_eq!(envelope.reason.as_deref(), Some(UNCAUGHT_REASON));
        assert!(envelope.is_exception());
    }

    #[test]
    fn test_serde_roundtrip_locks() {
        let envelope = Envelope::success(json!({"b": 2, "a": 1})).with_reason("fine");
        let rendered = envelope.render();
        assert!(rendered.ends_with('\n'));

        let back: Envelope = serde_json::from_str(&rendered).unwrap();
        assert!(back.locked);
        assert_eq!(back.succeeded(), envelope.succeeded());
        assert_eq!(back.data, envelope.data);
        assert_eq!(back.reason, envelope.reason);
    }

    #[test]
    fn test_render_sorted_keys() {
        let envelope = Envelope::success(json!(1));
        let rendered = envelope.render();
        let data_pos = rendered.find("\"data\"").unwrap();
        let reason_pos = rendered.find("\"reason\"").unwrap();
        let result_pos = rendered.find("\"result\"").unwrap();
        let trace_pos = rendered.find("\"trace\"").unwrap();
        assert!(data_pos < reason_pos && reason_pos < result_pos && result_pos < trace_pos);
    }

    #[test]
    fn test_wire_form_fields() {
        let value = Envelope::fail("permission denied").to_value();
        assert_eq!(value["result"], json!(false));
        assert_eq!(value["reason"], json!("permission denied"));
        assert_eq!(value["data"], Value::Null);
        assert!(value.get("locked").is_none());
    }
}
