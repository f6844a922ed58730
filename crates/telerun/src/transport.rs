//! # Transport
//!
//! A minimal, async interface for moving one request and one reply
//! between peers.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: the transport knows nothing about frames, values,
//!   or actions. It moves opaque buffers.
//! - **Connection-per-call**: every call opens a fresh connection, writes
//!   the payload, reads exactly one reply, and closes. There is no
//!   session state at this layer, which is what gives each proxy call
//!   site its strict request/response ordering.
//!
//! A transport failure is always distinct from an error encoded *inside*
//! a successful reply; the latter never surfaces here.

use std::fmt;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Errors that occur at the socket layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer could not be reached.
    Connect(String),
    /// The connection failed mid-transfer.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "Connection failed: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A mechanism to send a byte buffer and receive the single reply.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload and waits for the complete response.
    ///
    /// # invariants
    /// - Must return `Ok(vec)` with the raw reply bytes on success.
    /// - Must return `Err` if the network fails.
    /// - Must not interpret the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// TCP transport: one fresh connection per call.
///
/// The write side is half-closed after the payload so the server can read
/// to end-of-stream; the server closes the connection after its reply, so
/// the response is likewise read to end-of-stream.
pub struct TcpTransport {
    host: String,
    port: u16,
    read_buffer: usize,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, read_buffer: usize) -> Self {
        Self { host: host.into(), port, read_buffer }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        stream
            .write_all(payload)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| Error::Io(e.to_string()))?;

        let mut response = Vec::with_capacity(self.read_buffer);
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(response)
    }
}
