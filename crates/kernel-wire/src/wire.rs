//! JSON text form of an envelope.
//!
//! Used when a message has to cross the boundary as a single string, for
//! example when the host only accepts JSON or when messages are piped
//! through stdio. Buffers travel base64-encoded (see [`crate::base64`]).

use serde::Serialize;
use serde_json::{Map, Value};

use crate::base64::{serialize_buffers, RawBuffer};
use crate::buffer::BufferSequence;
use crate::envelope::{Channel, Header, MessageEnvelope};
use crate::error::WireError;

/// Serializable view of an envelope.
#[derive(Serialize)]
struct OutgoingMessage<'e, 'a> {
    header: &'e Header,
    parent_header: &'e Header,
    metadata: &'e Map<String, Value>,
    content: &'e Value,
    channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'e str>,
    #[serde(serialize_with = "serialize_buffer_ref")]
    buffers: &'e BufferSequence<'a>,
}

fn serialize_buffer_ref<S>(data: &&BufferSequence<'_>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serialize_buffers(data, serializer)
}

/// Encode an envelope, with an optional iopub topic.
pub fn to_json(envelope: &MessageEnvelope<'_>, topic: Option<&str>) -> Result<String, WireError> {
    let message = OutgoingMessage {
        header: &envelope.header,
        parent_header: &envelope.parent_header,
        metadata: &envelope.metadata,
        content: &envelope.content,
        channel: envelope.channel,
        topic,
        buffers: &envelope.buffers,
    };
    Ok(serde_json::to_string(&message)?)
}

/// Decode and validate an envelope from its JSON text form.
///
/// Validation is the same as [`MessageEnvelope::from_host`]; `buffers` may
/// be missing, `null`, or an array of base64 strings or `{dtype, data}`
/// objects.
pub fn from_json(text: &str) -> Result<MessageEnvelope<'static>, WireError> {
    let mut message: Value = serde_json::from_str(text)?;

    let raw = message
        .as_object_mut()
        .and_then(|obj| obj.remove("buffers"))
        .unwrap_or(Value::Null);
    let buffers = serde_json::from_value::<Option<Vec<RawBuffer>>>(raw)?
        .unwrap_or_default()
        .into_iter()
        .map(RawBuffer::decode)
        .collect::<Result<BufferSequence<'static>, WireError>>()?;

    Ok(MessageEnvelope::from_host(&message, buffers)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferView;
    use crate::error::{BufferError, EnvelopeError};
    use serde_json::json;

    #[test]
    fn test_to_json_shape() {
        let envelope = MessageEnvelope::new(
            Channel::IOPub,
            Header::new("status", "user", "session"),
            json!({"execution_state": "idle"}),
        );
        let text = to_json(&envelope, Some("kernel_core.abc.status")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["channel"], "iopub");
        assert_eq!(value["topic"], "kernel_core.abc.status");
        assert_eq!(value["header"]["msg_type"], "status");
        assert_eq!(value["parent_header"], json!({}));
        assert_eq!(value["buffers"], json!([]));
    }

    #[test]
    fn test_from_json_with_typed_buffers() {
        let envelope = MessageEnvelope::new(
            Channel::Shell,
            Header::new("comm_msg", "user", "session"),
            json!({"comm_id": "c1"}),
        )
        .with_buffers(
            [
                BufferView::from_slice(&[-1i8, 2, -3, 4, -5]),
                BufferView::from_slice(&[1.5f32, 2.5]),
            ]
            .into_iter()
            .collect(),
        );

        let decoded = from_json(&to_json(&envelope, None).unwrap()).unwrap();
        assert_eq!(decoded.header, envelope.header);
        assert_eq!(decoded.content, envelope.content);
        assert_eq!(decoded.buffers.len(), 2);
        assert_eq!(
            decoded.buffers.get(0).unwrap().to_vec::<i8>().unwrap(),
            vec![-1, 2, -3, 4, -5]
        );
        assert_eq!(
            decoded.buffers.get(1).unwrap().to_vec::<f32>().unwrap(),
            vec![1.5, 2.5]
        );
    }

    #[test]
    fn test_from_json_tolerates_frontend_shape() {
        let text = r#"
        {
            "header": {
                "date": "2025-05-14T14:32:23.490Z",
                "msg_id": "test-id",
                "msg_type": "kernel_info_request",
                "session": "test-session",
                "username": "",
                "version": "5.2"
            },
            "parent_header": null,
            "metadata": {},
            "content": {},
            "buffers": ["aGVsbG8="],
            "channel": "shell"
        }
        "#;

        let envelope = from_json(text).unwrap();
        assert_eq!(envelope.msg_type(), "kernel_info_request");
        assert!(envelope.parent_header.is_empty());
        assert_eq!(envelope.buffers.get(0).unwrap().bytes().unwrap(), b"hello");
    }

    #[test]
    fn test_from_json_requires_channel() {
        let err = from_json(r#"{"content": {}}"#).unwrap_err();
        assert!(matches!(
            err,
            WireError::Envelope(EnvelopeError::InvalidChannel(_))
        ));

        let err = from_json(r#"{"channel": "publish"}"#).unwrap_err();
        assert!(matches!(
            err,
            WireError::Envelope(EnvelopeError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_non_string_channel() {
        let err = from_json(r#"{"channel": 3}"#).unwrap_err();
        assert!(matches!(
            err,
            WireError::Envelope(EnvelopeError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_non_object_metadata() {
        let err = from_json(r#"{"channel": "shell", "metadata": [1, 2]}"#).unwrap_err();
        assert!(matches!(err, WireError::Envelope(EnvelopeError::Malformed(_))));

        let err = from_json("[]").unwrap_err();
        assert!(matches!(err, WireError::Envelope(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn test_from_json_reports_buffer_errors() {
        let text = r#"{"channel": "shell", "buffers": [{"dtype": "complex64", "data": ""}]}"#;
        let err = from_json(text).unwrap_err();
        assert!(matches!(
            err,
            WireError::Buffer(BufferError::UnsupportedType(t)) if t == "complex64"
        ));

        // "AQID" is three bytes, not a whole number of int16 elements.
        let text = r#"{"channel": "shell", "buffers": [{"dtype": "int16", "data": "AQID"}]}"#;
        let err = from_json(text).unwrap_err();
        assert!(matches!(
            err,
            WireError::Buffer(BufferError::Misaligned { .. })
        ));
    }

    #[test]
    fn test_from_json_null_buffers() {
        let envelope = from_json(r#"{"channel": "iopub", "buffers": null}"#).unwrap();
        assert!(envelope.buffers.is_empty());
        assert_eq!(envelope.content, json!({}));
    }
}
