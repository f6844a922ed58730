//! # Protocol Frames
//!
//! The closed set of envelopes that may appear on a socket.
//!
//! ## Invariants
//! - **Panic Safety**: all decoding paths return `Result`, never panicking
//!   on foreign bytes.
//! - **Strictness**: a frame must consume its buffer exactly; trailing
//!   bytes are a protocol violation.

use telepack::ObjectId;
use telepack::Reader;
use telepack::Value;
use telepack::Writer;

use crate::action::Action;
use crate::error::Error;
use crate::error::Result;

const FRAME_REQUEST: u8 = 0x01;
const FRAME_RESPONSE: u8 = 0x02;
const FRAME_PART: u8 = 0x03;
const FRAME_PART_REQUEST: u8 = 0x04;

/// One complete operation request: stateless, self-describing.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: Action,
    /// The identity the operation targets; `ObjectId::GLOBALS` for the
    /// host's global namespace.
    pub target: ObjectId,
    pub parameters: Option<Value>,
}

impl Request {
    pub fn new(action: Action, target: ObjectId, parameters: Option<Value>) -> Self {
        Self { action, target, parameters }
    }
}

/// Every message that can cross a socket.
///
/// Responses are a bare value; a remote execution fault travels as
/// `Value::Fault` inside a `Response`, never as a distinct frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Value),
    /// One chunk of an oversized serialized frame.
    Part { part: u32, part_count: u32, data: Vec<u8> },
    /// Receiver-driven pull for the next chunk.
    PartRequest { part: u32 },
}

impl Frame {
    /// Serializes this frame to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        match self {
            Frame::Request(request) => {
                writer.u8(FRAME_REQUEST);
                writer.str(request.action.as_str())?;
                writer.i64(request.target.0);
                match &request.parameters {
                    Some(value) => {
                        writer.u8(1);
                        writer.value(value)?;
                    }
                    None => writer.u8(0),
                }
            }
            Frame::Response(value) => {
                writer.u8(FRAME_RESPONSE);
                writer.value(value)?;
            }
            Frame::Part { part, part_count, data } => {
                writer.u8(FRAME_PART);
                writer.u32(*part);
                writer.u32(*part_count);
                writer.blob(data)?;
            }
            Frame::PartRequest { part } => {
                writer.u8(FRAME_PART_REQUEST);
                writer.u32(*part);
            }
        }
        Ok(writer.into_bytes())
    }

    /// Decodes wire bytes into exactly one frame.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let mut reader = Reader::new(bytes);
        let frame = match reader.u8()? {
            FRAME_REQUEST => {
                let action = Action::parse(reader.str()?)?;
                let target = ObjectId(reader.i64()?);
                let parameters = match reader.u8()? {
                    0 => None,
                    1 => Some(reader.value()?),
                    b => {
                        return Err(Error::ProtocolViolation(format!(
                            "bad parameter marker: {:#04x}",
                            b
                        )));
                    }
                };
                Frame::Request(Request { action, target, parameters })
            }
            FRAME_RESPONSE => Frame::Response(reader.value()?),
            FRAME_PART => {
                let part = reader.u32()?;
                let part_count = reader.u32()?;
                let data = reader.blob()?.to_vec();
                if part_count == 0 {
                    return Err(Error::ProtocolViolation("zero-part transfer".into()));
                }
                if part >= part_count {
                    return Err(Error::ProtocolViolation(format!(
                        "part {} out of range for {} parts",
                        part, part_count
                    )));
                }
                Frame::Part { part, part_count, data }
            }
            FRAME_PART_REQUEST => Frame::PartRequest { part: reader.u32()? },
            byte => return Err(Error::UnknownFrame(byte)),
        };
        reader.done()?;
        Ok(frame)
    }
}
