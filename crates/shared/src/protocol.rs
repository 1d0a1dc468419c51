//! Hub wire protocol: JSON hub frames terminated by the ASCII record
//! separator, as spoken by SignalR hubs over WebSockets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Every frame ends with this byte
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Query parameter carrying the access token on the WebSocket upgrade
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u64 = 1;
const TYPE_STREAM_ITEM: u64 = 2;
const TYPE_COMPLETION: u64 = 3;
const TYPE_STREAM_INVOCATION: u64 = 4;
const TYPE_CANCEL_INVOCATION: u64 = 5;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is missing a numeric `type`")]
    MissingType,
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

impl HandshakeRequest {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(terminate(serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Parse the handshake reply frame (without separator). An `error` field
    /// turns into [`ProtocolError::HandshakeRejected`].
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let response: HandshakeResponse = serde_json::from_str(frame)?;
        match response.error {
            Some(error) => Err(ProtocolError::HandshakeRejected(error)),
            None => Ok(response),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(terminate(serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
}

/// A decoded hub frame. Streaming frames are not used by these hubs and are
/// surfaced as [`HubMessage::Ignored`].
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    Completion(CompletionMessage),
    Ping,
    Close(CloseMessage),
    Ignored(u64),
}

#[derive(Serialize)]
struct Typed<'a, T> {
    #[serde(rename = "type")]
    kind: u64,
    #[serde(flatten)]
    body: &'a T,
}

impl HubMessage {
    /// Decode one frame (without its separator)
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingType)?;
        Ok(match kind {
            TYPE_INVOCATION => HubMessage::Invocation(serde_json::from_value(value)?),
            TYPE_COMPLETION => HubMessage::Completion(serde_json::from_value(value)?),
            TYPE_PING => HubMessage::Ping,
            TYPE_CLOSE => HubMessage::Close(serde_json::from_value(value)?),
            TYPE_STREAM_ITEM | TYPE_STREAM_INVOCATION | TYPE_CANCEL_INVOCATION => {
                HubMessage::Ignored(kind)
            }
            other => HubMessage::Ignored(other),
        })
    }

    /// Encode one frame including its separator
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let json = match self {
            HubMessage::Invocation(body) => serde_json::to_string(&Typed {
                kind: TYPE_INVOCATION,
                body,
            })?,
            HubMessage::Completion(body) => serde_json::to_string(&Typed {
                kind: TYPE_COMPLETION,
                body,
            })?,
            HubMessage::Close(body) => serde_json::to_string(&Typed {
                kind: TYPE_CLOSE,
                body,
            })?,
            HubMessage::Ping => format!("{{\"type\":{TYPE_PING}}}"),
            HubMessage::Ignored(kind) => format!("{{\"type\":{kind}}}"),
        };
        Ok(terminate(json))
    }
}

fn terminate(mut json: String) -> String {
    json.push(RECORD_SEPARATOR);
    json
}

/// Reassembles frames out of incoming text messages. A trailing fragment
/// without separator is kept until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    partial: String,
}

impl FrameBuffer {
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);
        let mut frames = Vec::new();
        while let Some(idx) = self.partial.find(RECORD_SEPARATOR) {
            let frame: String = self.partial.drain(..idx).collect();
            self.partial.drain(..RECORD_SEPARATOR.len_utf8());
            if !frame.trim().is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}
