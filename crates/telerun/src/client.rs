//! # Client Connection
//!
//! The client's end of the protocol: discovers a server, ships one
//! request per connection, drives chunked transfers in both directions,
//! and re-raises remote faults with their original kind and message.
//!
//! ## Invariants
//!
//! - One `roundtrip` is one complete operation: the caller blocks until
//!   the full reply is decoded. Ordering across concurrent callers is not
//!   promised; callers needing it serialize themselves.
//! - A fault in the reply is an `Error::Remote`, distinct from transport
//!   and protocol failures.

use std::sync::Arc;

use telepack::ObjectId;
use telepack::RemoteFault;
use telepack::Value;
use telerpc::Action;
use telerpc::Frame;
use telerpc::Progress;
use telerpc::Reassembly;
use telerpc::Request;
use telerpc::split_frame;

use crate::config::Config;
use crate::dispatch::SHUTDOWN_MESSAGE;
use crate::host::kind;
use crate::proxy::RemoteObject;
use crate::transport;
use crate::transport::TcpTransport;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    /// Socket-level failure reaching or reading the server.
    Transport(transport::Error),
    /// Malformed or unexpected envelope.
    Rpc(telerpc::Error),
    /// The host raised while performing the operation; kind and message
    /// are exactly what the host produced.
    Remote(RemoteFault),
    /// A top-level name was not defined in the host's global namespace.
    NameUndefined(String),
    /// The server denied the `initiate` handshake.
    Denied,
    /// The peer answered with a frame that makes no sense here.
    Protocol(String),
    /// No responsive server in the scanned port range.
    NoServer { start: u16, end: u16 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Rpc(e) => write!(f, "Protocol error: {}", e),
            Self::Remote(fault) => write!(f, "Remote fault: {}", fault),
            Self::NameUndefined(name) => write!(f, "Name '{}' is not defined on the host", name),
            Self::Denied => write!(f, "Connection denied by the host"),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::NoServer { start, end } => {
                write!(f, "No command server found on ports {}..={}", start, end)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Rpc(e) => Some(e),
            Self::Remote(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<telerpc::Error> for Error {
    fn from(e: telerpc::Error) -> Self {
        Self::Rpc(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A decoded reply as the client sees it: wire shapes with references
/// already turned into live proxies.
#[derive(Debug, Clone)]
pub enum RemoteValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<RemoteValue>),
    Set(Vec<RemoteValue>),
    Map(Vec<(RemoteValue, RemoteValue)>),
    Object(RemoteObject),
    /// A fault nested *inside* a container; a top-level fault is raised
    /// as `Error::Remote` instead of decoded.
    Fault(RemoteFault),
}

impl RemoteValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RemoteValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RemoteValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RemoteValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The proxy, if the host answered with an object reference.
    pub fn into_object(self) -> Result<RemoteObject> {
        match self {
            RemoteValue::Object(object) => Ok(object),
            other => Err(Error::Protocol(format!(
                "expected an object reference, got {:?}",
                other
            ))),
        }
    }
}

/// A live client relationship with one command server.
///
/// Cheap to clone; proxies hold a clone and route every operation
/// through it.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    limit: usize,
}

impl Connection {
    /// Discovers a server by probing the configured port range with the
    /// `test` action, taking the first responsive port.
    pub async fn connect(config: &Config) -> Result<Connection> {
        Self::connect_instance(config, 0).await
    }

    /// Like [`Connection::connect`], with the scan started `instance`
    /// ports into the range — instance `n` of a multi-host setup.
    pub async fn connect_instance(config: &Config, instance: u16) -> Result<Connection> {
        let start = config.port_start.saturating_add(instance);
        for port in start..=config.port_end {
            let connection = Self::with_transport(
                Arc::new(TcpTransport::new(&config.host, port, config.socket_buffer)),
                config.max_message_bytes,
            );
            if connection.probe().await {
                return Ok(connection);
            }
        }
        Err(Error::NoServer { start, end: config.port_end })
    }

    /// Connects to a known port, failing if no server answers there.
    pub async fn connect_to(config: &Config, port: u16) -> Result<Connection> {
        let connection = Self::with_transport(
            Arc::new(TcpTransport::new(&config.host, port, config.socket_buffer)),
            config.max_message_bytes,
        );
        if connection.probe().await {
            Ok(connection)
        } else {
            Err(Error::NoServer { start: port, end: port })
        }
    }

    /// Builds a connection over any transport. The runtime uses TCP;
    /// tests wire this straight to an in-memory session.
    pub fn with_transport(transport: Arc<dyn Transport>, limit: usize) -> Connection {
        Connection { transport, limit }
    }

    /// Liveness probe: a `test` round-trip that must answer `true`.
    pub async fn probe(&self) -> bool {
        matches!(
            self.request(Action::Test, ObjectId::GLOBALS, None).await,
            Ok(Value::Bool(true))
        )
    }

    /// Top-level name access: item access against the global namespace.
    pub async fn global(&self, name: &str) -> Result<RemoteValue> {
        let result = self
            .request(
                Action::Getitem,
                ObjectId::GLOBALS,
                Some(Value::Text(name.into())),
            )
            .await;
        match result {
            Err(Error::Remote(fault)) if fault.kind == kind::NAME_ERROR => {
                Err(Error::NameUndefined(name.into()))
            }
            other => Ok(self.decode_remote(other?)),
        }
    }

    /// Loads a module on the host and returns it as a proxy.
    pub async fn import_module(&self, name: &str) -> Result<RemoteValue> {
        let value = self
            .request(Action::Import, ObjectId::GLOBALS, Some(Value::Text(name.into())))
            .await?;
        Ok(self.decode_remote(value))
    }

    /// The advisory `initiate` handshake. `origin` is how this client
    /// names itself to the human on the host side.
    pub async fn handshake(&self, origin: &str) -> Result<()> {
        let verdict = self
            .request(
                Action::Initiate,
                ObjectId::GLOBALS,
                Some(Value::Text(origin.into())),
            )
            .await?;
        match verdict.as_text() {
            Some("accept") => Ok(()),
            Some("deny") => Err(Error::Denied),
            _ => Err(Error::Protocol("handshake verdict was not accept/deny".into())),
        }
    }

    /// Asks the server to stop accepting, returning its farewell.
    pub async fn shutdown_server(&self) -> Result<String> {
        let reply = self
            .request(Action::Shutdown, ObjectId::GLOBALS, None)
            .await?;
        match reply {
            Value::Text(farewell) => Ok(farewell),
            _ => Ok(SHUTDOWN_MESSAGE.into()),
        }
    }

    /// Ships one operation and returns the reply value, re-raising a
    /// fault reply as `Error::Remote`.
    pub async fn request(
        &self,
        action: Action,
        target: ObjectId,
        parameters: Option<Value>,
    ) -> Result<Value> {
        let frame = Frame::Request(Request::new(action, target, parameters));
        let value = self.roundtrip(&frame).await?;
        match value {
            Value::Fault(fault) => Err(Error::Remote(fault)),
            value => Ok(value),
        }
    }

    /// One full exchange, chunking outbound and pulling inbound as
    /// needed.
    async fn roundtrip(&self, frame: &Frame) -> Result<Value> {
        let bytes = frame.encode()?;

        // Outbound: an oversized request goes part by part, each part
        // acknowledged by the server's request for the next.
        let reply = if bytes.len() > self.limit {
            let parts = split_frame(&bytes, self.limit);
            let count = parts.len();
            let mut last = Vec::new();
            for (i, part) in parts.into_iter().enumerate() {
                last = self.transport.call(&part.encode()?).await?;
                if i + 1 < count {
                    match Frame::decode(&last)? {
                        Frame::PartRequest { part } if part as usize == i + 1 => {}
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected reply to partial transfer: {:?}",
                                frame_kind(&other)
                            )));
                        }
                    }
                }
            }
            last
        } else {
            self.transport.call(&bytes).await?
        };

        // Inbound: an oversized reply arrives as part 0; pull the rest.
        let mut frame = Frame::decode(&reply)?;
        if let Frame::Part { part, part_count, data } = frame {
            let mut assembly = Reassembly::new();
            let mut progress = assembly.offer(part, part_count, &data)?;
            loop {
                match progress {
                    Progress::Complete(buf) => {
                        frame = Frame::decode(&buf)?;
                        break;
                    }
                    Progress::Expect(next) => {
                        let pull = Frame::PartRequest { part: next }.encode()?;
                        let reply = self.transport.call(&pull).await?;
                        match Frame::decode(&reply)? {
                            Frame::Part { part, part_count, data } => {
                                progress = assembly.offer(part, part_count, &data)?;
                            }
                            other => {
                                return Err(Error::Protocol(format!(
                                    "expected part {}, got {:?}",
                                    next,
                                    frame_kind(&other)
                                )));
                            }
                        }
                    }
                }
            }
        }

        match frame {
            Frame::Response(value) => Ok(value),
            other => Err(Error::Protocol(format!(
                "expected a response, got {:?}",
                frame_kind(&other)
            ))),
        }
    }

    /// Turns a reply value into client shapes, wrapping every reference
    /// in a live proxy on this connection.
    pub fn decode_remote(&self, value: Value) -> RemoteValue {
        match value {
            Value::Null => RemoteValue::Null,
            Value::Bool(b) => RemoteValue::Bool(b),
            Value::Int(n) => RemoteValue::Int(n),
            Value::Float(x) => RemoteValue::Float(x),
            Value::Text(s) => RemoteValue::Text(s),
            Value::Bytes(b) => RemoteValue::Bytes(b),
            Value::List(items) => {
                RemoteValue::List(items.into_iter().map(|v| self.decode_remote(v)).collect())
            }
            Value::Set(items) => {
                RemoteValue::Set(items.into_iter().map(|v| self.decode_remote(v)).collect())
            }
            Value::Map(entries) => RemoteValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (self.decode_remote(k), self.decode_remote(v)))
                    .collect(),
            ),
            Value::Ref(id) => RemoteValue::Object(RemoteObject::new(id, self.clone())),
            Value::Fault(fault) => RemoteValue::Fault(fault),
        }
    }
}

fn frame_kind(frame: &Frame) -> &'static str {
    match frame {
        Frame::Request(_) => "request",
        Frame::Response(_) => "response",
        Frame::Part { .. } => "part",
        Frame::PartRequest { .. } => "part request",
    }
}
