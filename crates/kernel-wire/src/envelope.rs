//! Message envelopes and their validation.
//!
//! An envelope is the in-module shape of one Jupyter wire message: header,
//! parent header, metadata, content, channel and attached buffers. Envelopes
//! coming from the host are validated with [`MessageEnvelope::from_host`]:
//! the channel is mandatory, everything else is accepted leniently so that a
//! sloppy sender does not block listeners that never look at the header.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::buffer::BufferSequence;
use crate::error::{BufferError, EnvelopeError};

/// Protocol version written into generated headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Routing category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Shell,
    Control,
    Stdin,
    IOPub,
    Heartbeat,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Shell,
        Channel::Control,
        Channel::Stdin,
        Channel::IOPub,
        Channel::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Shell => "shell",
            Channel::Control => "control",
            Channel::Stdin => "stdin",
            Channel::IOPub => "iopub",
            Channel::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| EnvelopeError::InvalidChannel(format!("unknown channel `{s}`")))
    }
}

/// Message header. Every field is an opaque string; an all-empty header
/// stands for "no header".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Header {
    /// A fresh header with a random `msg_id` and the current UTC time.
    pub fn new(
        msg_type: impl Into<String>,
        username: impl Into<String>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: session.into(),
            username: username.into(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            msg_type: msg_type.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Header::default()
    }

    /// Read a header from loosely-shaped JSON.
    ///
    /// Missing, `null` or non-object values give an empty header. Fields that
    /// are not strings are left empty.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                log::warn!("[envelope] ignoring non-object header: {value}");
            }
            return Header::default();
        };
        let field = |name: &str| match obj.get(name) {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => {
                log::warn!("[envelope] ignoring non-string header field {name}: {other}");
                String::new()
            }
        };
        Header {
            msg_id: field("msg_id"),
            session: field("session"),
            username: field("username"),
            date: field("date"),
            msg_type: field("msg_type"),
            version: field("version"),
        }
    }
}

/// One protocol message with its attached buffers.
///
/// Listeners receive `&MessageEnvelope`; the buffers may borrow host memory
/// for `'a`, the duration of the dispatch that delivered the envelope.
#[derive(Debug, Clone)]
pub struct MessageEnvelope<'a> {
    pub header: Header,
    pub parent_header: Header,
    pub metadata: Map<String, Value>,
    pub content: Value,
    pub channel: Channel,
    pub buffers: BufferSequence<'a>,
}

impl<'a> MessageEnvelope<'a> {
    /// A new outgoing message with a generated header and no buffers.
    pub fn new(channel: Channel, header: Header, content: Value) -> Self {
        Self {
            header,
            parent_header: Header::default(),
            metadata: Map::new(),
            content,
            channel,
            buffers: BufferSequence::new(),
        }
    }

    /// Validate a host message and attach `buffers` to it.
    ///
    /// `channel` must be present and known. A missing or malformed header is
    /// treated as empty. `metadata` must be an object when present, and
    /// `content` defaults to `{}`. Any `buffers` key inside `message` is
    /// ignored: buffers cross the boundary separately.
    pub fn from_host(message: &Value, buffers: BufferSequence<'a>) -> Result<Self, EnvelopeError> {
        let obj = message
            .as_object()
            .ok_or_else(|| EnvelopeError::Malformed("message is not an object".into()))?;

        let channel = match obj.get("channel") {
            Some(Value::String(name)) => name.parse()?,
            Some(other) => {
                return Err(EnvelopeError::InvalidChannel(format!(
                    "channel must be a string, got {other}"
                )))
            }
            None => return Err(EnvelopeError::InvalidChannel("missing channel".into())),
        };

        let metadata = match obj.get("metadata") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(EnvelopeError::Malformed(format!(
                    "metadata must be an object, got {other}"
                )))
            }
        };

        let content = match obj.get("content") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value) => value.clone(),
        };

        Ok(Self {
            header: obj.get("header").map(Header::from_value).unwrap_or_default(),
            parent_header: obj
                .get("parent_header")
                .map(Header::from_value)
                .unwrap_or_default(),
            metadata,
            content,
            channel,
            buffers,
        })
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    pub fn with_buffers<'b>(self, buffers: BufferSequence<'b>) -> MessageEnvelope<'b> {
        MessageEnvelope {
            header: self.header,
            parent_header: self.parent_header,
            metadata: self.metadata,
            content: self.content,
            channel: self.channel,
            buffers,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_parent(mut self, parent_header: Header) -> Self {
        self.parent_header = parent_header;
        self
    }

    /// A reply on the same channel, parented to this message.
    pub fn reply(&self, msg_type: &str, content: Value) -> MessageEnvelope<'static> {
        MessageEnvelope::new(
            self.channel,
            Header::new(msg_type, &self.header.username, &self.header.session),
            content,
        )
        .with_parent(self.header.clone())
    }

    /// Copy any borrowed buffers so the envelope can be kept after the call.
    pub fn into_owned(self) -> Result<MessageEnvelope<'static>, BufferError> {
        let buffers = self.buffers.into_owned()?;
        Ok(MessageEnvelope {
            header: self.header,
            parent_header: self.parent_header,
            metadata: self.metadata,
            content: self.content,
            channel: self.channel,
            buffers,
        })
    }

    /// The JSON part of the message, without buffers.
    pub fn to_json_value(&self) -> Value {
        serde_json::json!({
            "header": self.header,
            "parent_header": self.parent_header,
            "metadata": self.metadata,
            "content": self.content,
            "channel": self.channel,
        })
    }
}

/// Reply content reporting success.
pub fn ok_reply() -> Value {
    serde_json::json!({
        "status": "ok",
        "payload": [],
        "user_expressions": {},
    })
}

/// Reply content reporting an error.
pub fn error_reply(ename: &str, evalue: &str, traceback: &[String]) -> Value {
    serde_json::json!({
        "status": "error",
        "ename": ename,
        "evalue": evalue,
        "traceback": traceback,
    })
}
