//! Wire messages exchanged with clients

use crate::error::{Result, SwitchboardError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object payload
pub type JsonObject = Map<String, Value>;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Messages from server to client
///
/// Serialized as `{"type": "<tag>", ...}` with camelCase field names. Each
/// variant carries only the fields its tag allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Message {
    /// Informational log line for the client to display
    Log {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Something went wrong on the backend
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Progress/state change of the backend process
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// First frame on every accepted connection
    SessionInit { session_id: String, timestamp: i64 },
    /// Acknowledgement of a client message, with the merged session view
    MessageReceived {
        session_id: String,
        data: JsonObject,
        timestamp: i64,
    },
    /// Fan-out to every open session
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonObject>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Application-level liveness probe
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Application-level liveness response
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// The backend finished its work for this session
    Finished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<JsonObject>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// A job listing discovered by a worker
    JobListing {
        data: JsonObject,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

impl Message {
    pub fn log(message: impl Into<String>) -> Self {
        Message::Log {
            message: message.into(),
            timestamp: Some(now_millis()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
            timestamp: Some(now_millis()),
        }
    }

    pub fn status(status: impl Into<String>, message: Option<String>) -> Self {
        Message::Status {
            status: status.into(),
            message,
            timestamp: Some(now_millis()),
        }
    }

    pub fn session_init(session_id: impl Into<String>) -> Self {
        Message::SessionInit {
            session_id: session_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn message_received(session_id: impl Into<String>, data: JsonObject) -> Self {
        Message::MessageReceived {
            session_id: session_id.into(),
            data,
            timestamp: now_millis(),
        }
    }

    /// Wrap a text payload as a `broadcast` message
    pub fn broadcast(message: impl Into<String>) -> Self {
        Message::Broadcast {
            message: Some(message.into()),
            data: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Wrap a structured payload as a `broadcast` message
    pub fn broadcast_data(data: JsonObject) -> Self {
        Message::Broadcast {
            message: None,
            data: Some(data),
            timestamp: Some(now_millis()),
        }
    }

    pub fn finished(message: Option<String>) -> Self {
        Message::Finished {
            message,
            data: None,
            timestamp: Some(now_millis()),
        }
    }

    pub fn job_listing(data: JsonObject) -> Self {
        Message::JobListing {
            data,
            timestamp: Some(now_millis()),
        }
    }

    /// The wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Log { .. } => "log",
            Message::Error { .. } => "error",
            Message::Status { .. } => "status",
            Message::SessionInit { .. } => "session_init",
            Message::MessageReceived { .. } => "message_received",
            Message::Broadcast { .. } => "broadcast",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Finished { .. } => "finished",
            Message::JobListing { .. } => "job_listing",
        }
    }

    /// Parse a server message, failing on unknown tags or missing fields
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(SwitchboardError::Decode)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages from client to server
///
/// Clients send loosely shaped JSON objects: `{"type": "ping"}` keeps the
/// session alive, anything else is an update whose optional `sessionData`
/// object is merged into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    Pong,
    Update {
        session_data: Option<JsonObject>,
        body: JsonObject,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(SwitchboardError::Decode)?;
        let Value::Object(body) = value else {
            return Err(SwitchboardError::MalformedMessage(
                "expected a JSON object".to_string(),
            ));
        };

        match body.get("type") {
            Some(Value::String(tag)) if tag == "ping" => return Ok(ClientMessage::Ping),
            Some(Value::String(tag)) if tag == "pong" => return Ok(ClientMessage::Pong),
            Some(Value::String(_)) | None => {}
            Some(other) => {
                return Err(SwitchboardError::MalformedMessage(format!(
                    "`type` must be a string, got {other}"
                )))
            }
        }

        let session_data = match body.get("sessionData") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(other) => {
                return Err(SwitchboardError::MalformedMessage(format!(
                    "`sessionData` must be an object, got {other}"
                )))
            }
        };

        Ok(ClientMessage::Update { session_data, body })
    }

    /// Whether this message only signals liveness
    pub fn is_liveness(&self) -> bool {
        matches!(self, ClientMessage::Ping | ClientMessage::Pong)
    }
}
