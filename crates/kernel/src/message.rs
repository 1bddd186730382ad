//! Kernel messaging envelopes and their JSON wire form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::MessageError;

pub const PROTOCOL_VERSION: &str = "5.0";
pub const SHELL_CHANNEL: &str = "shell";

pub const EXECUTE_REQUEST: &str = "execute_request";
pub const STREAM: &str = "stream";
pub const ERROR: &str = "error";

pub type MessageId = String;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "msg_id", default, deserialize_with = "null_as_default")]
    pub message_id: MessageId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(rename = "session", default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(rename = "msg_type", default, deserialize_with = "null_as_default")]
    pub message_type: String,
    #[serde(rename = "version", default, deserialize_with = "null_as_default")]
    pub protocol_version: String,
}

impl Header {
    /// A header for a new outbound message with a freshly generated id.
    pub fn new(message_type: &str, session: &Session) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            username: session.username.clone(),
            session_id: session.session_id.clone(),
            message_type: message_type.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Identity stamped on every outbound header. Both fields may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ename: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evalue: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub traceback: Vec<String>,
}

/// Message content, selected by the header's message type.
///
/// Content of a known type that does not have the expected shape is kept as
/// `Unrecognized` so that callers can treat it as a data error instead of
/// failing the whole decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    ExecuteRequest(ExecuteRequest),
    Stream(Stream),
    Error(ErrorReply),
    Unrecognized(Map<String, Value>),
}

impl Content {
    fn from_parts(message_type: &str, raw: Map<String, Value>) -> Self {
        let typed = match message_type {
            EXECUTE_REQUEST => serde_json::from_value(Value::Object(raw.clone()))
                .ok()
                .map(Content::ExecuteRequest),
            STREAM => serde_json::from_value(Value::Object(raw.clone()))
                .ok()
                .map(Content::Stream),
            ERROR => serde_json::from_value(Value::Object(raw.clone()))
                .ok()
                .map(Content::Error),
            _ => None,
        };

        typed.unwrap_or(Content::Unrecognized(raw))
    }

    fn into_raw(self) -> Result<Map<String, Value>, MessageError> {
        let value = match self {
            Content::ExecuteRequest(c) => serde_json::to_value(c),
            Content::Stream(c) => serde_json::to_value(c),
            Content::Error(c) => serde_json::to_value(c),
            Content::Unrecognized(raw) => return Ok(raw),
        }
        .map_err(MessageError::Encode)?;

        match value {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// One kernel message.
///
/// Decoding normalizes the frame, so encoding a decoded envelope does not
/// always reproduce it: a parent header with an empty `msg_id` is dropped
/// along with its other fields, `null` fields become empty, and typed content
/// gains the defaulted keys it arrived without (e.g. a stream's `name`).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Content,
    pub buffers: Vec<Value>,
    pub channel: String,
}

impl Envelope {
    pub fn execute_request(code: impl Into<String>, session: &Session) -> Self {
        Self {
            header: Header::new(EXECUTE_REQUEST, session),
            parent_header: None,
            metadata: Map::new(),
            content: Content::ExecuteRequest(ExecuteRequest::new(code)),
            buffers: Vec::new(),
            channel: SHELL_CHANNEL.to_string(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.header.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.header.message_type
    }

    /// The correlation key of a reply, if it has one.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()
            .map(|parent| parent.message_id.as_str())
    }

    pub fn is_reply_to(&self, message_id: &str) -> bool {
        self.parent_id() == Some(message_id)
    }

    pub fn encode(self) -> Result<String, MessageError> {
        let wire = WireEnvelope {
            header: self.header,
            parent_header: self.parent_header.unwrap_or_default(),
            metadata: self.metadata,
            content: self.content.into_raw()?,
            buffers: self.buffers,
            channel: self.channel,
        };

        serde_json::to_string(&wire).map_err(MessageError::Encode)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, MessageError> {
        let wire: WireEnvelope = serde_json::from_slice(frame).map_err(MessageError::Decode)?;

        let parent_header = Some(wire.parent_header).filter(|p| !p.message_id.is_empty());
        let content = Content::from_parts(&wire.header.message_type, wire.content);

        Ok(Self {
            header: wire.header,
            parent_header,
            metadata: wire.metadata,
            content,
            buffers: wire.buffers,
            channel: wire.channel,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    header: Header,
    #[serde(default, deserialize_with = "null_as_default")]
    parent_header: Header,
    #[serde(default, deserialize_with = "null_as_default")]
    metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    content: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    buffers: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    channel: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
