use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Opcodes for gateway frames. The numbering is wire-frozen.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const PRESENCE_UPDATE: u8 = 3;
    pub const VOICE_STATE_UPDATE: u8 = 4;
    pub const RESUME: u8 = 5;
    pub const RECONNECT: u8 = 6;
    pub const REQUEST_MEMBERS: u8 = 7;
    pub const TYPING: u8 = 8;
    pub const SUBSCRIBE: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// WebSocket close codes.
pub mod close_code {
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTH_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const INVALID_SEQ: u16 = 4007;
    pub const SESSION_TIMED_OUT: u16 = 4009;
}

/// Gateway frame envelope: `{"op": <int>, "t": <str?>, "d": <payload>,
/// "s": <int?>}`. `t` and `s` only appear on DISPATCH frames.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// IDENTIFY payload.
#[derive(Debug, Deserialize)]
pub struct IdentifyData {
    pub token: String,
    pub properties: Option<Value>,
}

/// RESUME payload: prior session plus the last sequence the client saw.
#[derive(Debug, Deserialize)]
pub struct ResumeData {
    pub session_id: String,
    pub seq: u64,
}

#[derive(Debug, Deserialize)]
pub struct PresenceUpdateData {
    pub status: String,
    pub activity: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TypingData {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeData {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RequestMembersData {
    pub guild_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VoiceStateUpdateData {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: Option<bool>,
    pub self_deaf: Option<bool>,
}

pub fn hello(heartbeat_interval: Duration) -> String {
    json!({
        "op": opcode::HELLO,
        "d": { "heartbeat_interval": heartbeat_interval.as_millis() as u64 }
    })
    .to_string()
}

pub fn heartbeat_ack() -> String {
    json!({ "op": opcode::HEARTBEAT_ACK }).to_string()
}

/// Server-initiated reconnect. `resumable: false` is the invalid-session
/// signal: the client must drop its session state and IDENTIFY afresh.
pub fn reconnect(resumable: bool) -> String {
    json!({
        "op": opcode::RECONNECT,
        "d": { "resumable": resumable }
    })
    .to_string()
}

/// Sequenced DISPATCH frame. Every frame of this shape flows through a
/// session's writer and lands in its resume buffer.
pub fn dispatch(event_type: &str, data: &Value, seq: u64) -> String {
    json!({
        "op": opcode::DISPATCH,
        "t": event_type,
        "d": data,
        "s": seq
    })
    .to_string()
}

/// Client-visible error for a rejected or malformed frame. Deliberately NOT
/// sequenced: errors never enter the resume buffer and never disturb the
/// dispatch ordering contract.
pub fn error(code: &str, message: &str) -> String {
    json!({
        "op": opcode::DISPATCH,
        "t": "error",
        "d": { "code": code, "message": message }
    })
    .to_string()
}

/// Partial-update payload: changed fields plus an explicit `_clear` list of
/// fields the receiver must treat as removed. Fields absent from both are
/// unchanged on the client.
pub fn partial_update(id: &str, changed: Value, clear: &[&str]) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("id".to_string(), Value::String(id.to_string()));
    if let Value::Object(fields) = changed {
        for (key, value) in fields {
            body.insert(key, value);
        }
    }
    if !clear.is_empty() {
        body.insert(
            "_clear".to_string(),
            Value::Array(clear.iter().map(|f| Value::String(f.to_string())).collect()),
        );
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_uses_short_keys_and_omits_absent_fields() {
        let text = dispatch("message.create", &json!({"id": "1"}), 7);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["op"], 0);
        assert_eq!(parsed["t"], "message.create");
        assert_eq!(parsed["s"], 7);
        assert_eq!(parsed["d"]["id"], "1");

        let ack: Value = serde_json::from_str(&heartbeat_ack()).unwrap();
        assert_eq!(ack["op"], 11);
        assert!(ack.get("t").is_none());
        assert!(ack.get("s").is_none());
    }

    #[test]
    fn frame_envelope_round_trips() {
        let frame: Frame = serde_json::from_str(r#"{"op":2,"d":{"token":"Bearer x"}}"#).unwrap();
        assert_eq!(frame.op, opcode::IDENTIFY);
        assert!(frame.seq.is_none());
        let identify: IdentifyData = serde_json::from_value(frame.data.unwrap()).unwrap();
        assert_eq!(identify.token, "Bearer x");
    }

    #[test]
    fn hello_carries_interval_in_millis() {
        let parsed: Value =
            serde_json::from_str(&hello(Duration::from_secs(45))).unwrap();
        assert_eq!(parsed["op"], 10);
        assert_eq!(parsed["d"]["heartbeat_interval"], 45_000);
    }

    #[test]
    fn error_frames_are_not_sequenced() {
        let parsed: Value = serde_json::from_str(&error("forbidden", "nope")).unwrap();
        assert_eq!(parsed["op"], 0);
        assert_eq!(parsed["t"], "error");
        assert!(parsed.get("s").is_none());
    }

    #[test]
    fn partial_update_lists_cleared_fields() {
        let body = partial_update("42", json!({"name": "general"}), &["topic", "icon"]);
        assert_eq!(body["id"], "42");
        assert_eq!(body["name"], "general");
        assert_eq!(body["_clear"], json!(["topic", "icon"]));

        let body = partial_update("42", json!({"name": "general"}), &[]);
        assert!(body.get("_clear").is_none());
    }
}
