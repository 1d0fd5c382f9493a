//! Chunk payloads moving through the connection graph.

use bytes::Bytes;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// Whether a node consumes/produces raw bytes or structured values.
///
/// The mode is advisory: it describes what a node expects on its input and
/// emits on its output, and it drives the mode-derivation rule for
/// pipelines. No coercion happens at the channel level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    /// Byte-stream mode; chunks are [`Chunk::Bytes`].
    #[default]
    Bytes,
    /// Value-stream mode; chunks are [`Chunk::Value`].
    Values,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Bytes => write!(f, "bytes"),
            DataMode::Values => write!(f, "values"),
        }
    }
}

/// A unit of data flowing between nodes.
///
/// Chunks are cheap to clone: the byte variant shares its backing storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Raw bytes.
    Bytes(Bytes),
    /// A structured value.
    Value(Value),
}

impl Chunk {
    /// Create a byte chunk from anything byte-like.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    /// Create a value chunk.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// The data mode this chunk belongs to.
    pub fn mode(&self) -> DataMode {
        match self {
            Chunk::Bytes(_) => DataMode::Bytes,
            Chunk::Value(_) => DataMode::Values,
        }
    }

    /// Borrow the raw bytes, if this is a byte chunk.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Chunk::Bytes(b) => Some(b),
            Chunk::Value(_) => None,
        }
    }

    /// Borrow the structured value, if this is a value chunk.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Chunk::Value(v) => Some(v),
            Chunk::Bytes(_) => None,
        }
    }

    /// View the chunk as text.
    ///
    /// Byte chunks must be valid UTF-8; value chunks must be JSON strings.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Chunk::Bytes(b) => std::str::from_utf8(b).ok().map(Cow::Borrowed),
            Chunk::Value(Value::String(s)) => Some(Cow::Borrowed(s.as_str())),
            Chunk::Value(_) => None,
        }
    }

    /// Number of bytes in a byte chunk; 0 for value chunks.
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(b) => b.len(),
            Chunk::Value(_) => 0,
        }
    }

    /// Check if a byte chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for Chunk {
    fn from(b: Bytes) -> Self {
        Chunk::Bytes(b)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(v))
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Bytes(Bytes::from(s.into_bytes()))
    }
}

impl From<Value> for Chunk {
    fn from(v: Value) -> Self {
        Chunk::Value(v)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Bytes(b) => write!(f, "{} bytes", b.len()),
            Chunk::Value(v) => write!(f, "{v}"),
        }
    }
}
