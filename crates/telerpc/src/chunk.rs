//! # Chunked Transfer
//!
//! When a serialized frame exceeds the message threshold it never travels
//! whole. The sender splits the bytes into parts; the receiver pulls them
//! one at a time, reassembles the buffer, and decodes the logical frame
//! inside. Either side may be the oversized one (large call arguments vs.
//! large results), so both halves of the exchange live here as pure state
//! machines with no I/O.

use std::collections::HashMap;

use crate::error::Error;
use crate::error::Result;
use crate::frame::Frame;

/// Splits serialized frame bytes into `limit`-sized parts.
///
/// Always yields at least one part; the last part may be short. The
/// caller is expected to have checked `bytes.len() > limit` first, but a
/// small buffer simply produces a single-part transfer.
pub fn split_frame(bytes: &[u8], limit: usize) -> Vec<Frame> {
    let limit = limit.max(1);
    let chunks: Vec<&[u8]> = bytes.chunks(limit).collect();
    let part_count = chunks.len().max(1) as u32;
    if chunks.is_empty() {
        return vec![Frame::Part { part: 0, part_count: 1, data: Vec::new() }];
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, data)| Frame::Part {
            part: i as u32,
            part_count,
            data: data.to_vec(),
        })
        .collect()
}

/// What a `Reassembly` wants next.
#[derive(Debug, PartialEq)]
pub enum Progress {
    /// The transfer is complete; these are the original bytes.
    Complete(Vec<u8>),
    /// Reply with `PartRequest` for this index.
    Expect(u32),
}

/// Receiver-side reassembly of one chunked transfer.
///
/// The buffer exists only for the duration of one transfer and is handed
/// back (and the machine reset) once the final part lands. Parts must
/// arrive strictly in order; anything out of step is a protocol error.
#[derive(Debug, Default)]
pub struct Reassembly {
    buf: Vec<u8>,
    expect: u32,
    total: Option<u32>,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one part into the transfer.
    pub fn offer(&mut self, part: u32, part_count: u32, data: &[u8]) -> Result<Progress> {
        if part == 0 {
            // A new transfer begins; drop anything half-assembled.
            self.buf.clear();
            self.expect = 0;
            self.total = Some(part_count);
        }
        if part != self.expect {
            let expected = self.expect;
            self.reset();
            return Err(Error::UnexpectedPart { expected, got: part });
        }
        if self.total != Some(part_count) {
            self.reset();
            return Err(Error::ProtocolViolation(
                "part count changed mid-transfer".into(),
            ));
        }
        self.buf.extend_from_slice(data);
        if part + 1 == part_count {
            let buf = std::mem::take(&mut self.buf);
            self.reset();
            Ok(Progress::Complete(buf))
        } else {
            self.expect = part + 1;
            Ok(Progress::Expect(self.expect))
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.expect = 0;
        self.total = None;
    }
}

/// Sender-side store for the tail of a chunked transfer.
///
/// The first part is returned immediately; the rest wait here for the
/// receiver's `PartRequest`s and are consumed as they are served, so a
/// completed transfer leaves nothing behind.
#[derive(Debug, Default)]
pub struct PartStore {
    parts: HashMap<u32, Frame>,
}

impl PartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a fresh set of outgoing parts, returning part 0 for
    /// immediate transmission. Any previous unfinished transfer is
    /// discarded.
    pub fn load(&mut self, parts: Vec<Frame>) -> Result<Frame> {
        self.parts.clear();
        let mut first = None;
        for frame in parts {
            let Frame::Part { part, .. } = &frame else {
                return Err(Error::ProtocolViolation(
                    "part store loaded with a non-part frame".into(),
                ));
            };
            if *part == 0 {
                first = Some(frame);
            } else {
                self.parts.insert(*part, frame);
            }
        }
        first.ok_or(Error::PartNotStored(0))
    }

    /// Serves one stored part, removing it from the store.
    pub fn take(&mut self, part: u32) -> Result<Frame> {
        self.parts.remove(&part).ok_or(Error::PartNotStored(part))
    }

    /// True if no transfer is pending.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
