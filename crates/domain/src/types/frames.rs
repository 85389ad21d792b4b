//! Gateway wire frames
//!
//! Every gateway message is a JSON object `{ op, d, s, t }`. `s` and `t` are
//! only meaningful on dispatches (op 0).

use std::fmt;
use std::time::Duration;

use conduit_common::utils::serde::duration_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::ConduitError;

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OpCode {
    Dispatch,
    Heartbeat,
    Identify,
    PresenceUpdate,
    VoiceStateUpdate,
    Resume,
    Reconnect,
    RequestGuildMembers,
    InvalidSession,
    Hello,
    HeartbeatAck,
}

/// An opcode outside the known set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown gateway opcode {0}")]
pub struct UnknownOpCode(pub u8);

impl TryFrom<u8> for OpCode {
    type Error = UnknownOpCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(UnknownOpCode(other)),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
        }
    }
}

impl OpCode {
    /// Opcodes a caller may send through the session's command surface
    pub const fn is_user_command(self) -> bool {
        matches!(self, Self::PresenceUpdate | Self::VoiceStateUpdate | Self::RequestGuildMembers)
    }
}

/// One gateway message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: OpCode,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Frame with a payload and no sequence or event name
    pub fn new(op: OpCode, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }

    /// Frame with a typed payload
    pub fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, ConduitError> {
        let d = serde_json::to_value(payload)
            .map_err(|err| ConduitError::InvalidRequest(format!("{op:?} payload: {err}")))?;
        Ok(Self::new(op, d))
    }

    /// Heartbeat carrying the last received sequence (or null)
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, sequence.map_or(Value::Null, Value::from))
    }

    /// Decode the payload into a typed value
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ConduitError> {
        serde_json::from_value(self.d.clone())
            .map_err(|err| ConduitError::Decode(format!("{:?} payload: {err}", self.op)))
    }

    /// Event name of a dispatch
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }
}

/// Payload of op 10
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
}

/// Client properties sent with Identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "conduit".to_string(),
            device: "conduit".to_string(),
        }
    }
}

/// Payload of op 2
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    pub token: String,
    pub properties: ConnectionProperties,
    pub intents: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"<redacted>")
            .field("properties", &self.properties)
            .field("intents", &self.intents)
            .field("shard", &self.shard)
            .field("large_threshold", &self.large_threshold)
            .finish_non_exhaustive()
    }
}

/// Payload of op 6
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// The fields of the READY dispatch the session itself needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// What a close code obliges the session to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Reconnect and resume the existing session
    Resume,
    /// Reconnect with a fresh Identify
    Reidentify,
    /// Stop; reconnecting cannot succeed
    Fatal,
}

/// Gateway close codes with service-defined meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    UnknownError,
    UnknownOpcode,
    DecodeError,
    NotAuthenticated,
    AuthenticationFailed,
    AlreadyAuthenticated,
    InvalidSequence,
    RateLimited,
    SessionTimedOut,
    InvalidShard,
    ShardingRequired,
    InvalidApiVersion,
    InvalidIntents,
    DisallowedIntents,
}

impl CloseCode {
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            4000 => Self::UnknownError,
            4001 => Self::UnknownOpcode,
            4002 => Self::DecodeError,
            4003 => Self::NotAuthenticated,
            4004 => Self::AuthenticationFailed,
            4005 => Self::AlreadyAuthenticated,
            4007 => Self::InvalidSequence,
            4008 => Self::RateLimited,
            4009 => Self::SessionTimedOut,
            4010 => Self::InvalidShard,
            4011 => Self::ShardingRequired,
            4012 => Self::InvalidApiVersion,
            4013 => Self::InvalidIntents,
            4014 => Self::DisallowedIntents,
            _ => return None,
        })
    }

    pub const fn disposition(self) -> CloseDisposition {
        match self {
            Self::InvalidSequence | Self::SessionTimedOut => CloseDisposition::Reidentify,
            Self::AuthenticationFailed
            | Self::InvalidShard
            | Self::ShardingRequired
            | Self::InvalidApiVersion
            | Self::InvalidIntents
            | Self::DisallowedIntents => CloseDisposition::Fatal,
            Self::UnknownError
            | Self::UnknownOpcode
            | Self::DecodeError
            | Self::NotAuthenticated
            | Self::AlreadyAuthenticated
            | Self::RateLimited => CloseDisposition::Resume,
        }
    }

    /// Disposition for any received close code; codes without a defined
    /// meaning (abnormal closure, proxies) are treated as resumable drops
    pub fn classify(code: Option<u16>) -> CloseDisposition {
        code.and_then(Self::from_code).map_or(CloseDisposition::Resume, Self::disposition)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn frames_decode_with_numeric_opcodes() {
        let frame: GatewayFrame = serde_json::from_value(
            json!({ "op": 0, "d": { "id": "1" }, "s": 42, "t": "MESSAGE_CREATE" }),
        )
        .expect("decode dispatch");

        assert_eq!(frame.op, OpCode::Dispatch);
        assert_eq!(frame.s, Some(42));
        assert_eq!(frame.event_name(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let result: Result<GatewayFrame, _> = serde_json::from_value(json!({ "op": 5, "d": null }));
        assert!(result.is_err());
    }

    #[test]
    fn heartbeat_serializes_sequence_or_null() {
        let with_seq = serde_json::to_value(GatewayFrame::heartbeat(Some(117))).expect("encode");
        assert_eq!(with_seq, json!({ "op": 1, "d": 117 }));

        let without = serde_json::to_value(GatewayFrame::heartbeat(None)).expect("encode");
        assert_eq!(without, json!({ "op": 1, "d": null }));
    }

    #[test]
    fn hello_interval_is_milliseconds() {
        let frame: GatewayFrame =
            serde_json::from_value(json!({ "op": 10, "d": { "heartbeat_interval": 41250 } }))
                .expect("decode hello");
        let hello: Hello = frame.payload().expect("hello payload");
        assert_eq!(hello.heartbeat_interval, Duration::from_millis(41_250));
    }

    #[test]
    fn identify_debug_redacts_token() {
        let identify = Identify {
            token: "secret".into(),
            properties: ConnectionProperties::default(),
            intents: 513,
            shard: Some([0, 1]),
            large_threshold: Some(50),
            presence: None,
        };
        assert!(!format!("{identify:?}").contains("secret"));

        let encoded = serde_json::to_value(&identify).expect("encode");
        assert_eq!(encoded["shard"], json!([0, 1]));
        assert!(encoded.get("presence").is_none());
    }

    #[test]
    fn close_codes_classify() {
        assert_eq!(CloseCode::classify(Some(4000)), CloseDisposition::Resume);
        assert_eq!(CloseCode::classify(Some(4007)), CloseDisposition::Reidentify);
        assert_eq!(CloseCode::classify(Some(4009)), CloseDisposition::Reidentify);
        assert_eq!(CloseCode::classify(Some(4004)), CloseDisposition::Fatal);
        assert_eq!(CloseCode::classify(Some(4014)), CloseDisposition::Fatal);
        assert_eq!(CloseCode::classify(Some(1006)), CloseDisposition::Resume);
        assert_eq!(CloseCode::classify(None), CloseDisposition::Resume);
    }
}
