use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::Domain;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agents send `1`, `"1"` or `"v1"`.
impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let digits = raw.trim();
        let digits = digits.strip_prefix('v').unwrap_or(digits);
        digits
            .parse::<u16>()
            .map(ProtocolVersion)
            .map_err(|err| format!("invalid protocol version '{raw}': {err}"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Number(i64),
    Text(String),
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawVersion::deserialize(deserializer)? {
            RawVersion::Number(number) => u16::try_from(number)
                .map(ProtocolVersion)
                .map_err(|_| de::Error::custom(format!("protocol version out of range: {number}"))),
            RawVersion::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

/// JSON envelope exchanged with agents over the hub socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(flatten)]
    pub msg: WireMsg,
}

impl WireEnvelope {
    pub fn new(msg: WireMsg) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            session_id: None,
            request_id: None,
            timestamp: String::new(),
            msg,
        }
    }

    pub fn reply_to(request: &WireEnvelope, msg: WireMsg) -> Self {
        Self {
            session_id: request.session_id.clone(),
            request_id: request.request_id.clone(),
            ..Self::new(msg)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMsg {
    Register(RegisterPayload),
    Registered(RegisteredPayload),
    Subscribe(SubscribePayload),
    Unsubscribe(UnsubscribePayload),
    CurrentData(CurrentDataPayload),
    Update(UpdatePayload),
    Heartbeat(HeartbeatPayload),
    HeartbeatAck(HeartbeatAck),
    ComponentStatus(ComponentStatusPayload),
    Error(ErrorPayload),
}

impl WireMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMsg::Register(_) => "register",
            WireMsg::Registered(_) => "registered",
            WireMsg::Subscribe(_) => "subscribe",
            WireMsg::Unsubscribe(_) => "unsubscribe",
            WireMsg::CurrentData(_) => "current_data",
            WireMsg::Update(_) => "update",
            WireMsg::Heartbeat(_) => "heartbeat",
            WireMsg::HeartbeatAck(_) => "heartbeat_ack",
            WireMsg::ComponentStatus(_) => "component_status",
            WireMsg::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterPayload {
    pub host_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredPayload {
    pub session_id: String,
    pub response_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribePayload {
    pub subscription_id: String,
    pub destination: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsubscribePayload {
    pub subscription_id: String,
}

/// Inbound it carries the agent's hash; outbound it carries the outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentDataPayload {
    pub domain: Domain,
    #[serde(default)]
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdatePayload {
    pub destination: String,
    pub subscription_id: String,
    pub event: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub response_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub response_id: u64,
    #[serde(default)]
    pub restart_agent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentStatusPayload {
    #[serde(default)]
    pub reports: Vec<ComponentStatusReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentStatusReport {
    pub cluster_id: String,
    pub service_name: String,
    pub component_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(raw: &str, max_frame_bytes: usize) -> Result<T, FrameError> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_accepts_string_and_integer() {
        let from_string: ProtocolVersion = serde_json::from_value(json!("v1")).expect("string");
        let from_number: ProtocolVersion = serde_json::from_value(json!(1)).expect("number");
        assert_eq!(from_string, ProtocolVersion::CURRENT);
        assert_eq!(from_number, ProtocolVersion::CURRENT);
        assert!(serde_json::from_value::<ProtocolVersion>(json!(-3)).is_err());
        assert!(serde_json::from_value::<ProtocolVersion>(json!(70000)).is_err());
        assert!(serde_json::from_value::<ProtocolVersion>(json!("one")).is_err());
        assert_eq!(" v2 ".parse::<ProtocolVersion>(), Ok(ProtocolVersion(2)));
        assert_eq!(serde_json::to_value(ProtocolVersion::CURRENT).expect("serialize"), json!("1"));
    }

    #[test]
    fn envelope_uses_type_and_payload_keys() {
        let raw = r#"{"version":"1","type":"current_data","request_id":"r1","payload":{"domain":"alert_definitions","hash":"abc"}}"#;
        let envelope: WireEnvelope = decode_frame(raw, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(envelope.request_id.as_deref(), Some("r1"));
        match &envelope.msg {
            WireMsg::CurrentData(payload) => {
                assert_eq!(payload.domain, Domain::AlertDefinitions);
                assert_eq!(payload.hash, "abc");
                assert!(payload.outcome.is_none());
            }
            other => panic!("unexpected message: {}", other.kind()),
        }
    }

    #[test]
    fn reply_keeps_request_correlation() {
        let request = WireEnvelope {
            session_id: Some("s1".to_string()),
            request_id: Some("r9".to_string()),
            ..WireEnvelope::new(WireMsg::Heartbeat(HeartbeatPayload {
                response_id: 4,
                agent_env: None,
            }))
        };
        let reply = WireEnvelope::reply_to(
            &request,
            WireMsg::HeartbeatAck(HeartbeatAck {
                response_id: 5,
                restart_agent: false,
            }),
        );
        let encoded = encode_frame(&reply, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let value: Value = serde_json::from_str(&encoded).expect("json");
        assert_eq!(value["type"], "heartbeat_ack");
        assert_eq!(value["request_id"], "r9");
        assert_eq!(value["payload"]["response_id"], 5);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let envelope = WireEnvelope::new(WireMsg::Error(ErrorPayload {
            code: "x".repeat(64),
            message: String::new(),
        }));
        assert!(matches!(
            encode_frame(&envelope, 16),
            Err(FrameError::OversizedFrame { max: 16, .. })
        ));
    }
}
