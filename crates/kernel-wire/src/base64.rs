//! Base64 serialization/deserialization for typed message buffers.
//!
//! Each buffer is written as `{"dtype": "<element type>", "data": "<base64>"}`.
//! On the way in, a bare base64 string is also accepted and read as `uint8`,
//! which is what most Jupyter frontends send.

use base64::prelude::*;
use bytes::Bytes;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::buffer::{BufferSequence, BufferView, ElementType};
use crate::error::WireError;

#[derive(Serialize)]
struct EncodedBuffer {
    dtype: ElementType,
    data: String,
}

/// A buffer as it appears in wire JSON, before its type is checked.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawBuffer {
    Plain(String),
    Typed { dtype: String, data: String },
}

impl RawBuffer {
    /// Check the type tag and decode the data into an owned view.
    pub(crate) fn decode(self) -> Result<BufferView<'static>, WireError> {
        let (element_type, data) = match self {
            RawBuffer::Plain(data) => (ElementType::Uint8, data),
            RawBuffer::Typed { dtype, data } => (dtype.parse::<ElementType>()?, data),
        };
        let bytes = BASE64_STANDARD.decode(data)?;
        Ok(BufferView::owned(element_type, Bytes::from(bytes))?)
    }
}

/// Serialize a buffer sequence as an array of typed base64 objects.
///
/// Used with `#[serde(serialize_with = "serialize_buffers")]`
pub fn serialize_buffers<S>(data: &BufferSequence<'_>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    data.iter()
        .map(|view| {
            let bytes = view.bytes().map_err(S::Error::custom)?;
            Ok(EncodedBuffer {
                dtype: view.element_type(),
                data: BASE64_STANDARD.encode(bytes),
            })
        })
        .collect::<Result<Vec<_>, S::Error>>()?
        .serialize(serializer)
}

/// Deserialize base64-encoded buffers into an owned sequence.
///
/// Handles both `null` and missing `buffers` field gracefully,
/// returning an empty sequence in those cases.
///
/// Used with `#[serde(default, deserialize_with = "deserialize_buffers")]`
pub fn deserialize_buffers<'de, D>(deserializer: D) -> Result<BufferSequence<'static>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<Vec<RawBuffer>> = Option::deserialize(deserializer)?;
    encoded
        .unwrap_or_default()
        .into_iter()
        .map(|buffer| buffer.decode().map_err(D::Error::custom))
        .collect()
}
