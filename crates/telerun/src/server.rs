//! # Server
//!
//! The sequential accept loop. One connection is read, dispatched, and
//! answered in full before the next is accepted — requests are serviced
//! one at a time, in arrival order. Embedders that must not block their
//! main workload run the loop on its own task via [`Server::spawn`].
//!
//! Chunk-transfer state (the reassembly buffer and the outgoing part
//! store) lives on the server across connections: each client operation
//! is a fresh stateless connection, and the one-client-relationship model
//! makes interleaved transfers from different peers a non-concern.

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use telepack::Value;
use telerpc::Frame;
use telerpc::PartStore;
use telerpc::Progress;
use telerpc::Reassembly;
use telerpc::split_frame;

use crate::config::Config;
use crate::dispatch::Control;
use crate::dispatch::Dispatcher;

#[derive(Debug)]
pub enum Error {
    /// No port in the configured range could be bound.
    Bind { start: u16, end: u16 },
    /// The one-shot callback to the manager could not be delivered.
    Callback(String),
    /// Socket failure on the accept loop itself.
    Io(String),
    /// The connection carried bytes that do not decode to a frame.
    Rpc(telerpc::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind { start, end } => {
                write!(f, "Cannot find port to bind to in {}..={}", start, end)
            }
            Self::Callback(msg) => write!(f, "Manager callback failed: {}", msg),
            Self::Io(msg) => write!(f, "Server I/O error: {}", msg),
            Self::Rpc(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<telerpc::Error> for Error {
    fn from(e: telerpc::Error) -> Self {
        Self::Rpc(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The frame-level request/reply machine, independent of sockets.
///
/// Feeding it the bytes of one inbound message yields the bytes of the
/// reply and a [`Control`] telling the loop whether to keep going. Tests
/// and in-memory transports drive this directly.
pub struct Session {
    dispatcher: Dispatcher,
    limit: usize,
    reassembly: Reassembly,
    parts: PartStore,
}

impl Session {
    pub fn new(dispatcher: Dispatcher, limit: usize) -> Self {
        Self {
            dispatcher,
            limit,
            reassembly: Reassembly::new(),
            parts: PartStore::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handles one inbound message, returning the serialized reply.
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> telerpc::Result<(Vec<u8>, Control)> {
        match Frame::decode(bytes)? {
            Frame::PartRequest { part } => {
                let frame = self.parts.take(part)?;
                Ok((frame.encode()?, Control::Continue))
            }
            Frame::Part { part, part_count, data } => {
                match self.reassembly.offer(part, part_count, &data)? {
                    Progress::Expect(next) => {
                        let reply = Frame::PartRequest { part: next }.encode()?;
                        Ok((reply, Control::Continue))
                    }
                    Progress::Complete(buf) => match Frame::decode(&buf)? {
                        Frame::Request(request) => self.respond(request),
                        _ => Err(telerpc::Error::ProtocolViolation(
                            "chunked transfer did not contain a request".into(),
                        )),
                    },
                }
            }
            Frame::Request(request) => self.respond(request),
            Frame::Response(_) => Err(telerpc::Error::ProtocolViolation(
                "server received a response frame".into(),
            )),
        }
    }

    fn respond(&mut self, request: telerpc::Request) -> telerpc::Result<(Vec<u8>, Control)> {
        let outcome = self.dispatcher.handle(request);
        let reply = Frame::Response(outcome.reply).encode()?;
        if reply.len() > self.limit {
            let first = self.parts.load(split_frame(&reply, self.limit))?;
            Ok((first.encode()?, outcome.control))
        } else {
            Ok((reply, outcome.control))
        }
    }
}

/// A bound server, ready to accept.
pub struct Server {
    listener: TcpListener,
    port: u16,
    session: Session,
    buffer: usize,
}

impl Server {
    /// Binds by scanning the configured range (or the one fixed port).
    pub async fn bind(dispatcher: Dispatcher, config: &Config) -> Result<Self> {
        let mut bound = None;
        for port in config.ports() {
            debug!(port, "checking port");
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(_) => continue,
            }
        }
        let listener = bound.ok_or(Error::Bind {
            start: config.port_start,
            end: config.port_end,
        })?;
        // Asking for port 0 binds an OS-assigned port; report what we got.
        let port = listener
            .local_addr()
            .map_err(|e| Error::Io(e.to_string()))?
            .port();
        info!(port, "server bound");
        Ok(Self {
            listener,
            port,
            session: Session::new(dispatcher, config.max_message_bytes),
            buffer: config.socket_buffer,
        })
    }

    /// Binds like [`Server::bind`], then reports `(bound, port)` to a
    /// managing process before any accepting happens. A failed bind is
    /// reported as `(false, 0)` so the manager fails fast instead of
    /// timing out.
    pub async fn bind_managed(
        dispatcher: Dispatcher,
        config: &Config,
        manager_port: u16,
    ) -> Result<Self> {
        let bound = Self::bind(dispatcher, config).await;
        let (ok, port) = match &bound {
            Ok(server) => (true, server.port),
            Err(_) => (false, 0),
        };
        callback(manager_port, ok, port).await?;
        bound
    }

    /// The port this server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Runs the accept loop until a `shutdown` request is answered.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::Io(e.to_string()))?;
            debug!(%peer, "connection accepted");
            match self.serve(stream).await {
                Ok(Control::Continue) => {}
                Ok(Control::Shutdown) => {
                    info!("shutdown requested; leaving accept loop");
                    return Ok(());
                }
                // One bad connection does not take down the loop.
                Err(e) => warn!("connection failed: {}", e),
            }
        }
    }

    /// Runs the accept loop on its own task, so an embedding host thread
    /// is never blocked by the protocol.
    pub fn spawn(self) -> ServerHandle {
        let port = self.port;
        let task = tokio::spawn(self.run());
        ServerHandle { port, task }
    }

    async fn serve(&mut self, mut stream: TcpStream) -> Result<Control> {
        let mut payload = Vec::with_capacity(self.buffer);
        stream
            .read_to_end(&mut payload)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        if payload.is_empty() {
            // Port scanners and dropped peers; nothing to answer.
            return Ok(Control::Continue);
        }

        let (reply, control) = self.session.handle_bytes(&payload)?;
        stream
            .write_all(&reply)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(control)
    }
}

/// Handle to a server running on its own task.
pub struct ServerHandle {
    port: u16,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the accept loop to finish (i.e. for `shutdown`).
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Io(format!("server task failed: {}", e)))?
    }

    /// Stops the loop without the protocol handshake. Prefer sending the
    /// `shutdown` action; this is for teardown in error paths.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Sends the one-shot `(bound, port)` status to the manager.
async fn callback(manager_port: u16, bound: bool, port: u16) -> Result<()> {
    let message = Value::List(vec![Value::Bool(bound), Value::Int(port as i64)]);
    let bytes = telepack::encode_value(&message)
        .map_err(|e| Error::Callback(e.to_string()))?;
    let mut stream = TcpStream::connect(("127.0.0.1", manager_port))
        .await
        .map_err(|e| Error::Callback(e.to_string()))?;
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Callback(e.to_string()))?;
    stream
        .shutdown()
        .await
        .map_err(|e| Error::Callback(e.to_string()))?;
    Ok(())
}
