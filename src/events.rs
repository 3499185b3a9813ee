//! `{type, data}` envelopes pushed over WebSocket and SSE.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "chat.request")]
    ChatRequest,
    #[serde(rename = "chat.admin_approved")]
    ChatAdminApproved,
    #[serde(rename = "chat.user_accepted")]
    ChatUserAccepted,
    #[serde(rename = "chat.rejected")]
    ChatRejected,

    #[serde(rename = "message")]
    Message,
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "presence")]
    Presence,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        use EventKind::*;
        match self {
            ChatRequest => "chat.request",
            ChatAdminApproved => "chat.admin_approved",
            ChatUserAccepted => "chat.user_accepted",
            ChatRejected => "chat.rejected",
            Message => "message",
            Typing => "typing",
            Presence => "presence",
            Error => "error",
            Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: EventKind, data: impl Serialize) -> Envelope {
        Envelope {
            kind,
            // every payload here is a plain struct or json! literal
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn error(reason: impl Into<String>) -> Envelope {
        Envelope::new(EventKind::Error, serde_json::json!({ "reason": reason.into() }))
    }

    pub fn heartbeat() -> Envelope {
        Envelope { kind: EventKind::Heartbeat, data: Value::Null }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","data":null}"#.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_kinds_use_dotted_names() {
        let env = Envelope::new(EventKind::ChatUserAccepted, serde_json::json!({ "room_id": "r" }));
        let json: Value = serde_json::from_str(&env.to_json()).unwrap();
        assert_eq!(json["type"], "chat.user_accepted");
        assert_eq!(json["data"]["room_id"], "r");
    }

    #[test]
    fn heartbeat_parses_without_data() {
        let env: Envelope = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(env, Envelope::heartbeat());
    }
}
