//! Push-delivery envelope codec.
//!
//! Bus push endpoints receive `{"message": {"data": <base64 JSON>,
//! "attributes": {...}}, "subscription": "..."}`. An empty or undecodable
//! envelope yields `None`; callers acknowledge and drop those.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

/// Extract the JSON payload from a push envelope.
pub fn decode_push(envelope: &Value) -> Option<Value> {
    let data = envelope.get("message")?.get("data")?.as_str()?;
    if data.is_empty() {
        return None;
    }
    let raw = STANDARD.decode(data).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Wrap a payload in a push envelope (used by tests and the loopback path).
pub fn encode_push(payload: &Value) -> Value {
    let data = STANDARD.encode(payload.to_string());
    serde_json::json!({ "message": { "data": data } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip() {
        let payload = json!({
            "event_type": "trade",
            "symbol": "AAPL",
            "price": 150.5,
            "timestamp_ms": 1_700_000_000_000i64,
        });
        let envelope = encode_push(&payload);
        assert_eq!(decode_push(&envelope).unwrap(), payload);
    }

    #[test]
    fn empty_data_yields_none() {
        assert!(decode_push(&json!({"message": {"data": ""}})).is_none());
    }

    #[test]
    fn missing_message_yields_none() {
        assert!(decode_push(&json!({})).is_none());
        assert!(decode_push(&json!({"message": {}})).is_none());
    }

    #[test]
    fn garbage_data_yields_none() {
        assert!(decode_push(&json!({"message": {"data": "not-base64!!"}})).is_none());
        let not_json = STANDARD.encode("not json");
        assert!(decode_push(&json!({"message": {"data": not_json}})).is_none());
    }
}
