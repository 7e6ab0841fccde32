//! Jupyter messages and typed binary buffers for in-process kernel boundaries.
//!
//! This crate models what crosses the boundary between a host environment
//! (typically a browser running JavaScript) and a kernel compiled into a
//! sandboxed module: Jupyter-shaped messages and the typed binary buffers
//! attached to them.
//!
//! # Features
//!
//! - [`BufferSequence`] of [`BufferView`]s that alias or copy host memory
//! - [`MessageEnvelope`] validation with a tolerant header policy
//! - Base64 JSON wire form for envelopes and their buffers
//! - Bidirectional conversion to/from `jupyter_protocol::JupyterMessage`

mod base64;
pub mod buffer;
pub mod envelope;
pub mod error;
mod protocol;
pub mod wire;

pub use crate::base64::{deserialize_buffers, serialize_buffers};
pub use buffer::{BufferSequence, BufferView, CopyPolicy, Element, ElementType, Memory};
pub use envelope::{error_reply, ok_reply, Channel, Header, MessageEnvelope, PROTOCOL_VERSION};
pub use error::{BufferError, EnvelopeError, WireError};
