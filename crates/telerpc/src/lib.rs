//! # Telerpc
//!
//! The protocol layer of the tele remote-object protocol: the action
//! vocabulary, the closed set of socket envelopes, and the chunked
//! transfer used when a serialized envelope outgrows a single message.
//!
//! ## Architecture
//!
//! Every byte string that appears on a socket decodes to exactly one
//! [`Frame`]. Oversized frames never travel whole: the sender splits the
//! serialized bytes into [`Frame::Part`] messages and the receiver pulls
//! them one at a time with [`Frame::PartRequest`], reassembling the
//! original bytes before decoding the logical frame inside.

mod action;
mod chunk;
mod error;
mod frame;

#[cfg(test)]
mod tests;

pub use crate::action::Action;
pub use crate::chunk::PartStore;
pub use crate::chunk::Progress;
pub use crate::chunk::Reassembly;
pub use crate::chunk::split_frame;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::frame::Frame;
pub use crate::frame::Request;
