//! Typed binary buffers that cross the host/module boundary.
//!
//! A [`BufferView`] describes one typed buffer: its element type, a byte range
//! and the memory that range lives in. That memory is either borrowed from the
//! side that produced it (valid only for the call that exposed it) or owned by
//! the view. A [`BufferSequence`] is the ordered list of views attached to a
//! single message; index `i` on one side of the boundary is index `i` on the
//! other.
//!
//! Borrowed views carry the lifetime of the producing call frame, so the
//! compiler rejects any attempt to keep them longer. Call
//! [`BufferSequence::into_owned`] to persist a sequence past the call.
//!
//! Multi-byte elements are little-endian, matching WebAssembly linear memory.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BufferError;

/// Element type of a typed buffer.
///
/// The set mirrors the typed array constructors a JavaScript host can hand
/// across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl ElementType {
    pub const ALL: [ElementType; 11] = [
        ElementType::Int8,
        ElementType::Uint8,
        ElementType::Uint8Clamped,
        ElementType::Int16,
        ElementType::Uint16,
        ElementType::Int32,
        ElementType::Uint32,
        ElementType::Int64,
        ElementType::Uint64,
        ElementType::Float32,
        ElementType::Float64,
    ];

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 | ElementType::Uint8Clamped => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Uint64 | ElementType::Float64 => 8,
        }
    }

    /// Lowercase tag used in JSON and configuration (`"float32"`).
    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::Uint8 => "uint8",
            ElementType::Uint8Clamped => "uint8clamped",
            ElementType::Int16 => "int16",
            ElementType::Uint16 => "uint16",
            ElementType::Int32 => "int32",
            ElementType::Uint32 => "uint32",
            ElementType::Int64 => "int64",
            ElementType::Uint64 => "uint64",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        }
    }

    /// Name of the matching JavaScript typed array constructor.
    pub fn js_constructor(self) -> &'static str {
        match self {
            ElementType::Int8 => "Int8Array",
            ElementType::Uint8 => "Uint8Array",
            ElementType::Uint8Clamped => "Uint8ClampedArray",
            ElementType::Int16 => "Int16Array",
            ElementType::Uint16 => "Uint16Array",
            ElementType::Int32 => "Int32Array",
            ElementType::Uint32 => "Uint32Array",
            ElementType::Int64 => "BigInt64Array",
            ElementType::Uint64 => "BigUint64Array",
            ElementType::Float32 => "Float32Array",
            ElementType::Float64 => "Float64Array",
        }
    }

    /// Number of elements in `byte_length` bytes, or `None` if the length
    /// does not divide evenly.
    pub fn element_count(self, byte_length: usize) -> Option<usize> {
        (byte_length % self.size() == 0).then(|| byte_length / self.size())
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses either the lowercase tag (`"int8"`) or the host constructor name
/// (`"Int8Array"`).
impl FromStr for ElementType {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s) || t.js_constructor() == s)
            .ok_or_else(|| BufferError::UnsupportedType(s.to_string()))
    }
}

/// Whether a boundary crossing aliases the producer's memory or copies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyPolicy {
    /// Alias the producer's memory for the duration of the call.
    #[default]
    Borrow,
    /// Copy into memory owned by the receiver.
    Copy,
}

/// Backing memory of a [`BufferView`].
#[derive(Debug, Clone)]
pub enum Memory<'a> {
    /// Memory owned by the other side of the boundary, valid for `'a` only.
    Borrowed(&'a [u8]),
    /// A private copy.
    Owned(Bytes),
}

impl Memory<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Memory::Borrowed(slice) => slice,
            Memory::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, Memory::Borrowed(_))
    }
}

/// Fixed-width numeric types that can live in a typed buffer.
pub trait Element: Copy + sealed::Sealed {
    const ELEMENT_TYPE: ElementType;

    /// Decode one element from exactly `ELEMENT_TYPE.size()` bytes.
    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut Vec<u8>);
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const ELEMENT_TYPE: ElementType = ElementType::$variant;

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
}

/// A single typed buffer descriptor.
#[derive(Debug, Clone)]
pub struct BufferView<'a> {
    element_type: ElementType,
    byte_offset: usize,
    byte_length: usize,
    memory: Memory<'a>,
}

impl<'a> BufferView<'a> {
    /// Describe `byte_length` bytes at `byte_offset` inside `memory`.
    pub fn new(
        element_type: ElementType,
        memory: Memory<'a>,
        byte_offset: usize,
        byte_length: usize,
    ) -> Result<Self, BufferError> {
        if element_type.element_count(byte_length).is_none() {
            return Err(BufferError::Misaligned {
                element_type,
                byte_length,
            });
        }
        let view = Self {
            element_type,
            byte_offset,
            byte_length,
            memory,
        };
        view.range()?;
        Ok(view)
    }

    /// View the whole of `bytes` without copying.
    pub fn borrowed(element_type: ElementType, bytes: &'a [u8]) -> Result<Self, BufferError> {
        Self::new(element_type, Memory::Borrowed(bytes), 0, bytes.len())
    }

    /// Take ownership of `bytes`.
    pub fn owned(element_type: ElementType, bytes: impl Into<Bytes>) -> Result<Self, BufferError> {
        let bytes = bytes.into();
        let len = bytes.len();
        Self::new(element_type, Memory::Owned(bytes), 0, len)
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn memory(&self) -> &Memory<'a> {
        &self.memory
    }

    pub fn is_borrowed(&self) -> bool {
        self.memory.is_borrowed()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.byte_length / self.element_type.size()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_length == 0
    }

    fn range(&self) -> Result<Range<usize>, BufferError> {
        let bounds = || BufferError::BufferBounds {
            byte_offset: self.byte_offset,
            byte_length: self.byte_length,
            capacity: self.memory.len(),
        };
        let end = self
            .byte_offset
            .checked_add(self.byte_length)
            .ok_or_else(bounds)?;
        if end > self.memory.len() {
            return Err(bounds());
        }
        Ok(self.byte_offset..end)
    }

    /// The raw bytes this view covers, without copying.
    pub fn bytes(&self) -> Result<&[u8], BufferError> {
        let range = self.range()?;
        Ok(&self.memory.as_slice()[range])
    }

    /// Decode the elements, checking that `T` matches the element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, BufferError> {
        if T::ELEMENT_TYPE != self.element_type {
            return Err(BufferError::TypeMismatch {
                expected: T::ELEMENT_TYPE,
                actual: self.element_type,
            });
        }
        Ok(self
            .bytes()?
            .chunks_exact(self.element_type.size())
            .map(T::read_le)
            .collect())
    }

    /// Copy into a view that owns its memory. Owned views are shared, not
    /// copied again.
    pub fn to_owned_view(&self) -> Result<BufferView<'static>, BufferError> {
        let range = self.range()?;
        let bytes = match &self.memory {
            Memory::Borrowed(slice) => Bytes::copy_from_slice(&slice[range]),
            Memory::Owned(bytes) => bytes.slice(range),
        };
        BufferView::owned(self.element_type, bytes)
    }
}

impl BufferView<'static> {
    /// Encode a slice of elements into an owned view.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let mut out = Vec::with_capacity(values.len() * T::ELEMENT_TYPE.size());
        for value in values {
            value.write_le(&mut out);
        }
        Self {
            element_type: T::ELEMENT_TYPE,
            byte_offset: 0,
            byte_length: out.len(),
            memory: Memory::Owned(Bytes::from(out)),
        }
    }
}

/// Ordered collection of buffers attached to one message.
#[derive(Debug, Clone, Default)]
pub struct BufferSequence<'a> {
    views: Vec<BufferView<'a>>,
}

impl<'a> BufferSequence<'a> {
    pub fn new() -> Self {
        Self { views: Vec::new() }
    }

    /// Build a sequence from host `(element_type, bytes)` pairs, aliasing the
    /// host's bytes.
    ///
    /// Fails on the first unsupported type tag; no partial sequence is
    /// returned.
    pub fn from_host<I, S>(buffers: I) -> Result<Self, BufferError>
    where
        I: IntoIterator<Item = (S, &'a [u8])>,
        S: AsRef<str>,
    {
        Self::from_host_with(buffers, CopyPolicy::Borrow)
    }

    /// Like [`BufferSequence::from_host`], choosing between aliasing and
    /// copying the host's bytes.
    pub fn from_host_with<I, S>(buffers: I, policy: CopyPolicy) -> Result<Self, BufferError>
    where
        I: IntoIterator<Item = (S, &'a [u8])>,
        S: AsRef<str>,
    {
        let views = buffers
            .into_iter()
            .map(|(tag, bytes)| {
                let element_type: ElementType = tag.as_ref().parse()?;
                match policy {
                    CopyPolicy::Borrow => BufferView::borrowed(element_type, bytes),
                    CopyPolicy::Copy => {
                        BufferView::owned(element_type, Bytes::copy_from_slice(bytes))
                    }
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { views })
    }

    /// Host-representable views over the current memory, in order.
    pub fn view(&self) -> Result<Vec<(ElementType, &[u8])>, BufferError> {
        self.views
            .iter()
            .map(|v| Ok((v.element_type(), v.bytes()?)))
            .collect()
    }

    /// Owned copies of every buffer, in order.
    pub fn copy(&self) -> Result<Vec<(ElementType, Bytes)>, BufferError> {
        self.views
            .iter()
            .map(|v| Ok((v.element_type(), Bytes::copy_from_slice(v.bytes()?))))
            .collect()
    }

    /// Detach from any borrowed memory so the sequence can outlive the call
    /// that produced it.
    pub fn into_owned(self) -> Result<BufferSequence<'static>, BufferError> {
        let views = self
            .views
            .iter()
            .map(BufferView::to_owned_view)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BufferSequence { views })
    }

    pub fn push(&mut self, view: BufferView<'a>) {
        self.views.push(view);
    }

    pub fn get(&self, index: usize) -> Option<&BufferView<'a>> {
        self.views.get(index)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BufferView<'a>> {
        self.views.iter()
    }

    /// Total bytes covered by all views.
    pub fn total_bytes(&self) -> usize {
        self.views.iter().map(BufferView::byte_length).sum()
    }
}

impl<'a> FromIterator<BufferView<'a>> for BufferSequence<'a> {
    fn from_iter<I: IntoIterator<Item = BufferView<'a>>>(iter: I) -> Self {
        Self {
            views: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for BufferSequence<'a> {
    type Item = BufferView<'a>;
    type IntoIter = std::vec::IntoIter<BufferView<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.views.into_iter()
    }
}

impl<'s, 'a> IntoIterator for &'s BufferSequence<'a> {
    type Item = &'s BufferView<'a>;
    type IntoIter = std::slice::Iter<'s, BufferView<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.views.iter()
    }
}
