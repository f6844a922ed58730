//! # Error Definitions
//!
//! Protocol-level failures: malformed envelopes, unknown vocabulary, and
//! chunk exchanges that went out of step.

use telepack::Error as PackError;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying telepack codec failed.
    Pack(PackError),
    /// The action string is not part of the protocol vocabulary.
    UnknownAction(String),
    /// The leading frame byte does not name a known envelope.
    UnknownFrame(u8),
    /// The envelope structure was invalid or violated the protocol.
    ProtocolViolation(String),
    /// A chunk arrived out of step with the transfer in progress.
    UnexpectedPart { expected: u32, got: u32 },
    /// A part was requested that the sender is not holding.
    PartNotStored(u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Pack(e) => write!(f, "Codec error: {}", e),
            Error::UnknownAction(name) => write!(f, "Unknown action: {}", name),
            Error::UnknownFrame(b) => write!(f, "Unknown frame byte: {:#04x}", b),
            Error::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Error::UnexpectedPart { expected, got } => {
                write!(f, "Unexpected part: expected {}, got {}", expected, got)
            }
            Error::PartNotStored(part) => write!(f, "Part {} is not stored", part),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Error::Pack(e)
    }
}

/// Specialized `Result` for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
