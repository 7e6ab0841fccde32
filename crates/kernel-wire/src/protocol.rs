//! Conversion between envelopes and `jupyter_protocol::JupyterMessage`.
//!
//! Lets envelopes received at the boundary be handed to code written against
//! the typed Jupyter message model, and typed messages be sent back out.
//! Typed messages carry untyped byte buffers, so buffers converted from a
//! `JupyterMessage` come back as `uint8`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use jupyter_protocol::{JupyterMessage, JupyterMessageContent};
use serde_json::{Map, Value};

use crate::buffer::{BufferSequence, BufferView, ElementType};
use crate::envelope::{Channel, Header, MessageEnvelope};
use crate::error::WireError;

impl From<Channel> for jupyter_protocol::Channel {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Shell => jupyter_protocol::Channel::Shell,
            Channel::Control => jupyter_protocol::Channel::Control,
            Channel::Stdin => jupyter_protocol::Channel::Stdin,
            Channel::IOPub => jupyter_protocol::Channel::IOPub,
            Channel::Heartbeat => jupyter_protocol::Channel::Heartbeat,
        }
    }
}

impl From<jupyter_protocol::Channel> for Channel {
    fn from(channel: jupyter_protocol::Channel) -> Self {
        match channel {
            jupyter_protocol::Channel::Shell => Channel::Shell,
            jupyter_protocol::Channel::Control => Channel::Control,
            jupyter_protocol::Channel::Stdin => Channel::Stdin,
            jupyter_protocol::Channel::IOPub => Channel::IOPub,
            jupyter_protocol::Channel::Heartbeat => Channel::Heartbeat,
        }
    }
}

impl TryFrom<&Header> for jupyter_protocol::Header {
    type Error = WireError;

    fn try_from(header: &Header) -> Result<Self, Self::Error> {
        let date = DateTime::parse_from_rfc3339(&header.date)
            .map_err(|source| WireError::Date {
                date: header.date.clone(),
                source,
            })?
            .with_timezone(&Utc);

        Ok(jupyter_protocol::Header {
            msg_id: header.msg_id.clone(),
            username: header.username.clone(),
            session: header.session.clone(),
            date,
            msg_type: header.msg_type.clone(),
            version: header.version.clone(),
        })
    }
}

impl From<&jupyter_protocol::Header> for Header {
    fn from(header: &jupyter_protocol::Header) -> Self {
        Header {
            msg_id: header.msg_id.clone(),
            session: header.session.clone(),
            username: header.username.clone(),
            date: header.date.to_rfc3339(),
            msg_type: header.msg_type.clone(),
            version: header.version.clone(),
        }
    }
}

impl TryFrom<&MessageEnvelope<'_>> for JupyterMessage {
    type Error = WireError;

    fn try_from(envelope: &MessageEnvelope<'_>) -> Result<Self, Self::Error> {
        let header = jupyter_protocol::Header::try_from(&envelope.header)?;
        let parent_header = if envelope.parent_header.is_empty() {
            None
        } else {
            Some(jupyter_protocol::Header::try_from(&envelope.parent_header)?)
        };
        let content = JupyterMessageContent::from_type_and_content(
            &envelope.header.msg_type,
            envelope.content.clone(),
        )
        .map_err(|e| WireError::Content(e.to_string()))?;
        let buffers = envelope
            .buffers
            .iter()
            .map(|view| Ok(Bytes::copy_from_slice(view.bytes()?)))
            .collect::<Result<Vec<_>, WireError>>()?;

        Ok(JupyterMessage {
            zmq_identities: Vec::new(),
            header,
            parent_header,
            metadata: Value::Object(envelope.metadata.clone()),
            content,
            buffers,
            channel: Some(envelope.channel.into()),
        })
    }
}

impl MessageEnvelope<'static> {
    /// Build an envelope from a typed message. `channel` is used when the
    /// message does not carry one.
    pub fn from_jupyter(message: JupyterMessage, channel: Channel) -> Result<Self, WireError> {
        let metadata = match message.metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let buffers = message
            .buffers
            .into_iter()
            .map(|bytes| BufferView::owned(ElementType::Uint8, bytes))
            .collect::<Result<BufferSequence<'static>, _>>()?;

        Ok(MessageEnvelope {
            header: Header::from(&message.header),
            parent_header: message
                .parent_header
                .as_ref()
                .map(Header::from)
                .unwrap_or_default(),
            metadata,
            content: serde_json::to_value(&message.content)?,
            channel: message.channel.map(Channel::from).unwrap_or(channel),
            buffers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(channel: &str) -> MessageEnvelope<'static> {
        let message = json!({
            "header": {
                "date": "2025-05-14T14:32:23.490Z",
                "msg_id": "test-id",
                "msg_type": "kernel_info_request",
                "session": "test-session",
                "username": "",
                "version": "5.2"
            },
            "parent_header": {},
            "metadata": {},
            "content": {},
            "channel": channel
        });
        MessageEnvelope::from_host(&message, BufferSequence::new()).unwrap()
    }

    #[test]
    fn test_convert_to_jupyter_message() {
        let envelope = request("shell");
        let jupyter_msg = JupyterMessage::try_from(&envelope).unwrap();

        assert_eq!(jupyter_msg.header.msg_type, "kernel_info_request");
        assert_eq!(jupyter_msg.header.msg_id, "test-id");
        assert!(jupyter_msg.parent_header.is_none());
        assert!(jupyter_msg.zmq_identities.is_empty());
    }

    #[test]
    fn test_roundtrip_through_jupyter_message() {
        let envelope = request("control");
        let jupyter_msg = JupyterMessage::try_from(&envelope).unwrap();
        let back = MessageEnvelope::from_jupyter(jupyter_msg, Channel::Shell).unwrap();

        assert_eq!(back.channel, Channel::Control);
        assert_eq!(back.header.msg_id, envelope.header.msg_id);
        assert_eq!(back.header.msg_type, "kernel_info_request");
        assert!(back.parent_header.is_empty());
    }

    #[test]
    fn test_invalid_date_is_reported() {
        let mut envelope = request("shell");
        envelope.header.date = "2019-09-07T-15:50+00".into();
        let err = JupyterMessage::try_from(&envelope).unwrap_err();
        assert!(matches!(err, WireError::Date { .. }));
    }

    #[test]
    fn test_channel_mapping_is_symmetric() {
        for channel in Channel::ALL {
            let mapped: jupyter_protocol::Channel = channel.into();
            assert_eq!(Channel::from(mapped), channel);
        }
    }
}
