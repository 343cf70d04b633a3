//! Gateway wire envelope: `{ "op", "s"?, "t"?, "d" }` as JSON text.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::error::GatewayError;

/// Envelope purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Opcode {
    /// Server → client event carrying `t` and `s`.
    Dispatch,
    /// Server → client, first frame: `d.heartbeat_interval` in ms.
    Hello,
    /// Client → server: `d = { token, compress }`.
    Identify,
    /// Client → server: `d` is the last sequence number seen.
    Heartbeat,
    /// Any opcode this client does not know. Still dispatched when it carries `t`.
    Unknown(i64),
}

impl From<i64> for Opcode {
    fn from(op: i64) -> Self {
        match op {
            0 => Opcode::Dispatch,
            1 => Opcode::Hello,
            2 => Opcode::Identify,
            4 => Opcode::Heartbeat,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for i64 {
    fn from(op: Opcode) -> i64 {
        match op {
            Opcode::Dispatch => 0,
            Opcode::Hello => 1,
            Opcode::Identify => 2,
            Opcode::Heartbeat => 4,
            Opcode::Unknown(n) => n,
        }
    }
}

/// One message on the gateway wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: Opcode,
    /// Sequence number; the latest one is echoed in heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event type, e.g. `MESSAGE_CREATE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

impl Envelope {
    pub fn new(op: Opcode, d: Value) -> Self {
        Self { op, s: None, t: None, d }
    }

    /// Identify frame sent right after hello.
    pub fn identify(token: Option<&str>, compress: bool) -> Self {
        Self::new(
            Opcode::Identify,
            json!({ "token": token, "compress": compress }),
        )
    }

    /// Heartbeat frame echoing the last seen sequence.
    pub fn heartbeat(sequence: u64) -> Self {
        Self::new(Opcode::Heartbeat, json!(sequence))
    }

    /// Heartbeat interval announced by a hello frame.
    pub fn hello_interval(&self) -> Result<Duration, GatewayError> {
        let ms = self
            .d
            .get("heartbeat_interval")
            .and_then(interval_millis)
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                GatewayError::MalformedMessage(
                    "hello without a positive heartbeat_interval".to_string(),
                )
            })?;
        Ok(Duration::from_millis(ms))
    }
}

/// Whole milliseconds from an integer, or a finite non-negative float rounded.
fn interval_millis(v: &Value) -> Option<u64> {
    if let Some(ms) = v.as_u64() {
        return Some(ms);
    }
    let ms = v.as_f64().filter(|f| f.is_finite() && *f >= 0.0)?.round();
    (ms <= u64::MAX as f64).then(|| ms as u64)
}

/// Parse one inbound text frame.
pub fn decode(raw: &str) -> Result<Envelope, GatewayError> {
    Ok(serde_json::from_str(raw)?)
}

/// Serialize an envelope to text.
pub fn encode(envelope: &Envelope) -> String {
    // Envelope holds only an i64, an optional u64, an optional string, and a Value;
    // none of these can fail to serialize.
    serde_json::to_string(envelope).unwrap_or_else(|e| {
        log::error!("envelope serialization failed: {}", e);
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_dispatch() {
        let env = decode(r#"{"op":0,"s":7,"t":"MESSAGE_CREATE","d":{"content":"hi"}}"#).unwrap();
        assert_eq!(env.op, Opcode::Dispatch);
        assert_eq!(env.s, Some(7));
        assert_eq!(env.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(env.d["content"], "hi");
    }

    #[test]
    fn decode_hello_interval() {
        let env = decode(r#"{"op":1,"d":{"heartbeat_interval":45000}}"#).unwrap();
        assert_eq!(env.op, Opcode::Hello);
        assert!(env.s.is_none());
        assert!(env.t.is_none());
        assert_eq!(env.hello_interval().unwrap(), Duration::from_millis(45000));
    }

    #[test]
    fn hello_without_interval_is_malformed() {
        let env = decode(r#"{"op":1,"d":{}}"#).unwrap();
        assert!(matches!(
            env.hello_interval(),
            Err(GatewayError::MalformedMessage(_))
        ));
        let env = decode(r#"{"op":1,"d":{"heartbeat_interval":0}}"#).unwrap();
        assert!(env.hello_interval().is_err());
        let env = decode(r#"{"op":1,"d":{"heartbeat_interval":-5.0}}"#).unwrap();
        assert!(env.hello_interval().is_err());
        let env = decode(r#"{"op":1,"d":{"heartbeat_interval":"45000"}}"#).unwrap();
        assert!(env.hello_interval().is_err());
    }

    #[test]
    fn hello_interval_accepts_floats() {
        let env = decode(r#"{"op":1,"d":{"heartbeat_interval":45000.0}}"#).unwrap();
        assert_eq!(env.hello_interval().unwrap(), Duration::from_millis(45000));
        let env = decode(r#"{"op":1,"d":{"heartbeat_interval":41250.6}}"#).unwrap();
        assert_eq!(env.hello_interval().unwrap(), Duration::from_millis(41251));
    }

    #[test]
    fn malformed_inputs() {
        for raw in [
            "",
            "not json",
            "[1,2,3]",
            r#"{"s":1,"t":"X","d":null}"#,
            r#"{"op":"1"}"#,
            r#"{"op":1.5}"#,
            r#"{"op":0,"s":-4}"#,
        ] {
            assert!(
                matches!(decode(raw), Err(GatewayError::MalformedMessage(_))),
                "expected malformed: {raw}"
            );
        }
    }

    #[test]
    fn unknown_opcode_round_trips() {
        let env = decode(r#"{"op":11,"d":null}"#).unwrap();
        assert_eq!(env.op, Opcode::Unknown(11));
        assert_eq!(encode(&env), r#"{"op":11,"d":null}"#);
    }

    #[test]
    fn out_of_byte_range_opcodes_round_trip() {
        let env = decode(r#"{"op":300,"s":9,"t":"TYPING_START","d":{}}"#).unwrap();
        assert_eq!(env.op, Opcode::Unknown(300));
        assert_eq!(env.s, Some(9));
        assert_eq!(encode(&env), r#"{"op":300,"s":9,"t":"TYPING_START","d":{}}"#);

        let env = decode(r#"{"op":-1,"d":null}"#).unwrap();
        assert_eq!(env.op, Opcode::Unknown(-1));
        assert_eq!(encode(&env), r#"{"op":-1,"d":null}"#);
    }

    #[test]
    fn sequence_above_2_pow_53_is_exact() {
        let big: u64 = (1u64 << 53) + 1;
        let raw = format!(r#"{{"op":0,"s":{},"t":"X","d":{{"id":{}}}}}"#, big, u64::MAX);
        let first = decode(&raw).unwrap();
        let second = decode(&encode(&first)).unwrap();
        assert_eq!(second.s, Some(big));
        assert_eq!(second.d["id"].as_u64(), Some(u64::MAX));
        assert_eq!(first, second);
    }

    #[test]
    fn encode_omits_absent_fields() {
        assert_eq!(encode(&Envelope::heartbeat(42)), r#"{"op":4,"d":42}"#);
        assert_eq!(
            encode(&Envelope::identify(Some("tok"), false)),
            r#"{"op":2,"d":{"token":"tok","compress":false}}"#
        );
        assert_eq!(
            encode(&Envelope::identify(None, false)),
            r#"{"op":2,"d":{"token":null,"compress":false}}"#
        );
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let env = decode(r#"{"op":4}"#).unwrap();
        assert_eq!(env.op, Opcode::Heartbeat);
        assert!(env.d.is_null());
    }
}
