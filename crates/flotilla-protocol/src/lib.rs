//! flotilla-protocol: the wire envelope shared by server and agent.
//!
//! Every message on the agent<->server session is an [`Envelope`]. The
//! envelope's `payload` is a JSON object whose legal shape depends on
//! `message_type`; this crate hands out typed views over that payload
//! instead of asking callers to poke at an untyped map.

mod command;
mod error;
mod event;
mod metrics;
mod response;

pub use command::*;
pub use error::CodecError;
pub use event::*;
pub use metrics::*;
pub use response::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five wire message kinds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Command,
    Response,
    Event,
    Heartbeat,
    Metrics,
}

/// The single unit on the wire.
///
/// `payload` is kept as a raw [`serde_json::Value`] at this layer so that
/// unknown fields survive a decode/encode round trip untouched (spec §4.1);
/// typed extractors below read only what they need out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build a `command` envelope. Generates a fresh UUID id when `id` is
    /// `None`, per spec invariant I2 (command ids must be unique per issue).
    pub fn command(id: Option<String>, action: &str, params: serde_json::Value) -> Self {
        Envelope {
            message_type: MessageType::Command,
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            payload: serde_json::json!({ "action": action, "params": params }),
        }
    }

    pub fn response_ok(id: impl Into<String>, data: serde_json::Value) -> Self {
        Envelope {
            message_type: MessageType::Response,
            id: id.into(),
            timestamp: Utc::now(),
            payload: serde_json::json!({ "status": "success", "data": data }),
        }
    }

    pub fn response_err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Envelope {
            message_type: MessageType::Response,
            id: id.into(),
            timestamp: Utc::now(),
            payload: serde_json::json!({ "status": "error", "error": error.into() }),
        }
    }

    pub fn event(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Envelope {
            message_type: MessageType::Event,
            id: String::new(),
            timestamp: Utc::now(),
            payload: serde_json::json!({ "event_type": event_type.into(), "data": data }),
        }
    }

    pub fn heartbeat(hb: &Heartbeat) -> Self {
        Envelope {
            message_type: MessageType::Heartbeat,
            id: String::new(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(hb).expect("Heartbeat always serializes"),
        }
    }

    pub fn metrics(m: &MetricsEnvelope) -> Self {
        Envelope {
            message_type: MessageType::Metrics,
            id: String::new(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(m).expect("MetricsEnvelope always serializes"),
        }
    }

    /// Serialize to a JSON string. Never fails for well-formed envelopes.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("Envelope always serializes")
    }

    /// Parse an envelope from raw bytes/text.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::InvalidFrame(e.to_string()))
    }

    pub fn as_command(&self) -> Result<CommandView, CodecError> {
        if self.message_type != MessageType::Command {
            return Err(CodecError::InvalidMessageType(format!(
                "{:?} is not a command",
                self.message_type
            )));
        }
        let action = self
            .payload
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodecError::InvalidPayload("command missing 'action'".into()))?
            .to_owned();
        let params = self
            .payload
            .get("params")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(CommandView {
            id: self.id.clone(),
            action,
            params,
        })
    }

    pub fn as_response(&self) -> Result<ResponseView, CodecError> {
        if self.message_type != MessageType::Response {
            return Err(CodecError::InvalidMessageType(format!(
                "{:?} is not a response",
                self.message_type
            )));
        }
        let status = self
            .payload
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodecError::InvalidPayload("response missing 'status'".into()))?;
        let ok = match status {
            "success" => true,
            "error" => false,
            other => {
                return Err(CodecError::InvalidPayload(format!(
                    "unknown response status '{other}'"
                )));
            }
        };
        Ok(ResponseView {
            id: self.id.clone(),
            ok,
            data: self.payload.get("data").cloned(),
            error: self
                .payload
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        })
    }

    pub fn as_event(&self) -> Result<EventView, CodecError> {
        if self.message_type != MessageType::Event {
            return Err(CodecError::InvalidMessageType(format!(
                "{:?} is not an event",
                self.message_type
            )));
        }
        let event_type = self
            .payload
            .get("event_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodecError::InvalidPayload("event missing 'event_type'".into()))?
            .to_owned();
        let data = self
            .payload
            .get("data")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(EventView { event_type, data })
    }

    pub fn as_heartbeat(&self) -> Result<Heartbeat, CodecError> {
        if self.message_type != MessageType::Heartbeat {
            return Err(CodecError::InvalidMessageType(format!(
                "{:?} is not a heartbeat",
                self.message_type
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))
    }

    pub fn as_metrics(&self) -> Result<MetricsEnvelope, CodecError> {
        if self.message_type != MessageType::Metrics {
            return Err(CodecError::InvalidMessageType(format!(
                "{:?} is not metrics",
                self.message_type
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))
    }
}

/// Typed view over a `command` envelope's payload.
#[derive(Debug, Clone)]
pub struct CommandView {
    pub id: String,
    pub action: String,
    pub params: serde_json::Value,
}

/// Typed view over a `response` envelope's payload.
#[derive(Debug, Clone)]
pub struct ResponseView {
    pub id: String,
    pub ok: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Typed view over an `event` envelope's payload.
#[derive(Debug, Clone)]
pub struct EventView {
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Heartbeat payload (spec §6): `{agent_id, agent_name, hostname, status, uptime, containers_running}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub agent_name: String,
    pub hostname: String,
    pub status: String,
    pub uptime_seconds: u64,
    pub containers_running: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_type_id_and_fields() {
        let env = Envelope::command(Some("c1".into()), "list_containers", serde_json::json!({"all": true}));
        let text = env.encode();
        let decoded = Envelope::decode(&text).unwrap();
        assert_eq!(decoded.message_type, MessageType::Command);
        assert_eq!(decoded.id, "c1");
        let view = decoded.as_command().unwrap();
        assert_eq!(view.action, "list_containers");
        assert_eq!(view.params, serde_json::json!({"all": true}));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = Envelope::decode("{not json").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame(_)));
    }

    #[test]
    fn decode_rejects_missing_type() {
        let err = Envelope::decode(r#"{"id":"x","timestamp":"2024-01-01T00:00:00Z","payload":{}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame(_)));
    }

    #[test]
    fn unknown_payload_fields_are_preserved_through_round_trip() {
        let mut env = Envelope::command(Some("c1".into()), "list_containers", serde_json::json!({}));
        env.payload
            .as_object_mut()
            .unwrap()
            .insert("extra_future_field".into(), serde_json::json!(42));
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded.payload.get("extra_future_field"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn as_command_on_wrong_type_is_invalid_message_type() {
        let env = Envelope::heartbeat(&Heartbeat {
            agent_id: "a".into(),
            agent_name: "a".into(),
            hostname: "h".into(),
            status: "ok".into(),
            uptime_seconds: 1,
            containers_running: 0,
        });
        assert!(matches!(env.as_command(), Err(CodecError::InvalidMessageType(_))));
    }

    #[test]
    fn response_extractor_surfaces_error_and_data() {
        let ok = Envelope::response_ok("c1", serde_json::json!({"containers": []}));
        let view = ok.as_response().unwrap();
        assert!(view.ok);
        assert_eq!(view.data, Some(serde_json::json!({"containers": []})));

        let err = Envelope::response_err("c1", "boom");
        let view = err.as_response().unwrap();
        assert!(!view.ok);
        assert_eq!(view.error.as_deref(), Some("boom"));
    }

    #[test]
    fn event_extractor_reads_event_type_and_data() {
        let env = Envelope::event("log_data", serde_json::json!({"container_id": "abc"}));
        let view = env.as_event().unwrap();
        assert_eq!(view.event_type, "log_data");
        assert_eq!(view.data.get("container_id").and_then(|v| v.as_str()), Some("abc"));
    }
}
