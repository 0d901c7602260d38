use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Inbound text frame from a client.
///
/// `args` stays an untyped JSON value here; each command handler
/// extracts what it needs so that argument errors carry the
/// command-specific message rather than a generic parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub req_id: u64,
    pub command: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

/// Event names broadcast to conversation members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    MemberJoined,
    MemberLeft,
    NewMessage,
}

/// Outbound envelope: a per-request response or a fan-out event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Response {
        /// Echo of the client's reqId. Absent when the frame never
        /// parsed, so there is no value to echo.
        #[serde(skip_serializing_if = "Option::is_none")]
        req_id: Option<u64>,
        status_code: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    Event { name: EventName, data: String },
}

impl ServerMessage {
    pub fn ok(req_id: u64) -> Self {
        Self::Response {
            req_id: Some(req_id),
            status_code: 200,
            body: None,
        }
    }

    pub fn ok_with_body(req_id: u64, body: impl Into<String>) -> Self {
        Self::Response {
            req_id: Some(req_id),
            status_code: 200,
            body: Some(body.into()),
        }
    }

    pub fn error(req_id: Option<u64>, err: &CommandError) -> Self {
        Self::Response {
            req_id,
            status_code: err.status_code(),
            body: Some(err.to_string()),
        }
    }

    pub fn event(name: EventName, data: impl Into<String>) -> Self {
        Self::Event {
            name,
            data: data.into(),
        }
    }
}
