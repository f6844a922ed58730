//! # Telepack
//!
//! The wire codec for the tele remote-object protocol: a closed `Value`
//! union and its byte-level TLV encoding.
//!
//! ## Philosophy
//!
//! - **Closed World**: `Value` is the complete set of shapes allowed to
//!   cross the wire. Anything else must be converted into a `Ref` by the
//!   server's table layer before it gets here.
//! - **TLV Architecture**: `[Tag: 1b][Payload]`. Fixed scalars carry their
//!   bytes directly; blobs are length-prefixed; containers are
//!   count-prefixed. All integers are Little-Endian.
//! - **Bounded**: decoding is a bounds-checked cursor that never panics on
//!   foreign bytes; both directions enforce a nesting depth limit.


/// The maximum nesting depth for values before encoding or decoding fails.
pub const MAX_DEPTH: usize = 64;

/// Telepack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid telepack `Tag`.
    InvalidTag(u8),
    /// Text data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// A value decoded cleanly but bytes were left over.
    TrailingBytes(usize),
    /// Blob or container size exceeds `u32::MAX`.
    TooLarge(usize),
    /// The nested depth of a value exceeded `MAX_DEPTH`.
    DepthLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "Invalid tag byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "Text is not valid UTF-8"),
            Error::UnexpectedEnd => write!(f, "Unexpected end of buffer"),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            Error::TooLarge(n) => write!(f, "Blob or container too large: {} items", n),
            Error::DepthLimitExceeded => write!(f, "Value nesting exceeds depth limit"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for telepack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identity of an object held by a server's object table.
///
/// Identities are allocated monotonically and never reused within one
/// server lifetime. `ObjectId::GLOBALS` (`-1`) is reserved: it names the
/// host's global namespace and is never an allocated table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub i64);

impl ObjectId {
    /// The host's addressable global namespace.
    pub const GLOBALS: ObjectId = ObjectId(-1);

    /// True if this identity names the global namespace rather than a
    /// table entry.
    pub fn is_globals(&self) -> bool {
        *self == Self::GLOBALS
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

/// A remote execution error, carried losslessly as data.
///
/// A fault is the *result* of an operation that raised on the host side.
/// It is never raised during encode or decode; the client re-raises it
/// after the round trip with the same kind and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    /// The error kind as the host names it (e.g. `"KeyError"`).
    pub kind: String,
    /// The human-readable message attached by the host.
    pub message: String,
}

impl RemoteFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteFault {}

/// Every shape that may cross the wire.
///
/// Containers compose recursively; `Map` keys are full values, and the
/// wire preserves entry order. `Set` carries set *intent* (the host side
/// rebuilds its native set type); on the wire it is an ordered run of
/// elements like `List`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Ref(ObjectId),
    Fault(RemoteFault),
}

impl Value {
    /// Short type description, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Ref(_) => "ref",
            Value::Fault(_) => "fault",
        }
    }

    /// The text payload, if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an `Int` value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Bool` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Identifies the shape of the encoded value that follows.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Null = 0x00,
    False = 0x01,
    True = 0x02,
    // Fixed-width scalars
    Int = 0x03,
    Float = 0x04,
    // Blobs (Tag + u32 Len + Data)
    Text = 0x05,
    Bytes = 0x06,
    // Containers (Tag + u32 Count + Elements)
    List = 0x10,
    Set = 0x11,
    Map = 0x12,
    // Protocol shapes
    Ref = 0x20,
    Fault = 0x21,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Tag::Null),
            0x01 => Some(Tag::False),
            0x02 => Some(Tag::True),
            0x03 => Some(Tag::Int),
            0x04 => Some(Tag::Float),
            0x05 => Some(Tag::Text),
            0x06 => Some(Tag::Bytes),
            0x10 => Some(Tag::List),
            0x11 => Some(Tag::Set),
            0x12 => Some(Tag::Map),
            0x20 => Some(Tag::Ref),
            0x21 => Some(Tag::Fault),
            _ => None,
        }
    }
}

/// An append-only byte writer for wire messages.
///
/// Tagged `Value`s go through [`Writer::value`]; the untagged primitive
/// methods exist for fixed-layout frame fields built on top of this crate.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Consumes the writer and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Writes a raw byte.
    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Writes a u32 (LE).
    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes an i64 (LE).
    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes an f64 (LE).
    pub fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(v.as_bytes())
    }

    /// Writes a length-prefixed byte blob.
    pub fn blob(&mut self, v: &[u8]) -> Result<()> {
        if v.len() > u32::MAX as usize {
            return Err(Error::TooLarge(v.len()));
        }
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        Ok(())
    }

    /// Writes a tagged `Value`, recursively.
    pub fn value(&mut self, value: &Value) -> Result<()> {
        self.value_at(value, 0)
    }

    fn value_at(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthLimitExceeded);
        }
        match value {
            Value::Null => self.u8(Tag::Null as u8),
            Value::Bool(true) => self.u8(Tag::True as u8),
            Value::Bool(false) => self.u8(Tag::False as u8),
            Value::Int(n) => {
                self.u8(Tag::Int as u8);
                self.i64(*n);
            }
            Value::Float(x) => {
                self.u8(Tag::Float as u8);
                self.f64(*x);
            }
            Value::Text(s) => {
                self.u8(Tag::Text as u8);
                self.str(s)?;
            }
            Value::Bytes(b) => {
                self.u8(Tag::Bytes as u8);
                self.blob(b)?;
            }
            Value::List(items) => self.elements(Tag::List, items, depth)?,
            Value::Set(items) => self.elements(Tag::Set, items, depth)?,
            Value::Map(entries) => {
                if entries.len() > u32::MAX as usize {
                    return Err(Error::TooLarge(entries.len()));
                }
                self.u8(Tag::Map as u8);
                self.u32(entries.len() as u32);
                for (key, val) in entries {
                    self.value_at(key, depth + 1)?;
                    self.value_at(val, depth + 1)?;
                }
            }
            Value::Ref(id) => {
                self.u8(Tag::Ref as u8);
                self.i64(id.0);
            }
            Value::Fault(fault) => {
                self.u8(Tag::Fault as u8);
                self.str(&fault.kind)?;
                self.str(&fault.message)?;
            }
        }
        Ok(())
    }

    fn elements(&mut self, tag: Tag, items: &[Value], depth: usize) -> Result<()> {
        if items.len() > u32::MAX as usize {
            return Err(Error::TooLarge(items.len()));
        }
        self.u8(tag as u8);
        self.u32(items.len() as u32);
        for item in items {
            self.value_at(item, depth + 1)?;
        }
        Ok(())
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the cursor. All reads return `Error::UnexpectedEnd`
/// rather than panicking when the buffer runs out.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails unless the cursor has consumed the entire buffer.
    pub fn done(&self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingBytes(self.buf.len()))
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a raw byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a u32 (LE).
    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Reads an i64 (LE).
    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads an f64 (LE).
    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads a length-prefixed UTF-8 string slice.
    pub fn str(&mut self) -> Result<&'a str> {
        let bytes = self.blob()?;
        str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Reads a length-prefixed byte slice.
    pub fn blob(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Reads one tagged `Value`, recursively.
    pub fn value(&mut self) -> Result<Value> {
        self.value_at(0)
    }

    fn value_at(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthLimitExceeded);
        }
        let byte = self.u8()?;
        let tag = Tag::from_u8(byte).ok_or(Error::InvalidTag(byte))?;
        match tag {
            Tag::Null => Ok(Value::Null),
            Tag::True => Ok(Value::Bool(true)),
            Tag::False => Ok(Value::Bool(false)),
            Tag::Int => Ok(Value::Int(self.i64()?)),
            Tag::Float => Ok(Value::Float(self.f64()?)),
            Tag::Text => Ok(Value::Text(self.str()?.to_string())),
            Tag::Bytes => Ok(Value::Bytes(self.blob()?.to_vec())),
            Tag::List => Ok(Value::List(self.elements(depth)?)),
            Tag::Set => Ok(Value::Set(self.elements(depth)?)),
            Tag::Map => {
                let count = self.u32()? as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = self.value_at(depth + 1)?;
                    let val = self.value_at(depth + 1)?;
                    entries.push((key, val));
                }
                Ok(Value::Map(entries))
            }
            Tag::Ref => Ok(Value::Ref(ObjectId(self.i64()?))),
            Tag::Fault => {
                let kind = self.str()?.to_string();
                let message = self.str()?.to_string();
                Ok(Value::Fault(RemoteFault { kind, message }))
            }
        }
    }

    fn elements(&mut self, depth: usize) -> Result<Vec<Value>> {
        let count = self.u32()? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.value_at(depth + 1)?);
        }
        Ok(items)
    }
}

/// Encodes a single `Value` into a standalone byte vector.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    writer.value(value)?;
    Ok(writer.into_bytes())
}

/// Decodes a standalone byte vector into a single `Value`.
///
/// The buffer must contain exactly one value; trailing bytes are an error.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(bytes);
    let value = reader.value()?;
    reader.done()?;
    Ok(value)
}
