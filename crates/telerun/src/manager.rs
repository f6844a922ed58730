//! # Manager
//!
//! Spawns a private host process, negotiates its server port, and tears
//! the pair down cleanly.
//!
//! The life of a managed session: bind an ephemeral listen port; spawn
//! the host with that port as the trailing launch argument; block (with a
//! timeout) for the server's one-shot `(bound, port)` callback; connect a
//! client to the negotiated port. Licensing failures — the host exiting
//! with a sentinel code before calling back — are retried with a delay,
//! up to a ceiling. Shutdown sends the protocol's `shutdown` action, then
//! reaps the subprocess and keeps its captured output for diagnosis.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::process::Child;
use tokio::process::Command;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use telepack::Value;

use crate::client;
use crate::client::Connection;
use crate::config::Config;
use crate::transport::TcpTransport;

/// Where a managed session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingCallback,
    Bound,
    Failed,
    ShuttingDown,
    Closed,
}

/// What the host process wrote before it exited.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum Error {
    /// The manager could not bind its own listen port.
    PortBind(String),
    /// The host process could not be spawned at all.
    Spawn(String),
    /// The callback connection misbehaved (socket error, bad payload).
    Callback(String),
    /// Every licensing retry was spent.
    LicenseExhausted { attempts: u32 },
    /// The host process died or stalled before the handshake finished.
    StartupFailed {
        code: Option<i32>,
        message: String,
        output: Option<CapturedOutput>,
    },
    /// The server called back successfully but no client connection
    /// could be established to it.
    Client {
        source: client::Error,
        output: Option<CapturedOutput>,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PortBind(msg) => write!(f, "MANAGER: Cannot bind a port: {}", msg),
            Self::Spawn(msg) => write!(f, "Failed to launch host process: {}", msg),
            Self::Callback(msg) => write!(f, "Server callback failed: {}", msg),
            Self::LicenseExhausted { attempts } => {
                write!(f, "Maximum license retry count exceeded after {} attempts", attempts)
            }
            Self::StartupFailed { code, message, .. } => match code {
                Some(code) => write!(f, "{} (exit code {})", message, code),
                None => write!(f, "{}", message),
            },
            Self::Client { source, .. } => {
                write!(f, "Could not connect to the managed server: {}", source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Client { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Error {
    /// The host's captured stdout/stderr, when the failure mode had a
    /// process to collect from.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            Self::StartupFailed { output, .. } | Self::Client { output, .. } => output.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

enum Callback {
    Received { bound: bool, port: u16 },
    TimedOut,
    Failed(String),
}

/// One supervised host-process session.
pub struct Manager {
    config: Config,
    state: State,
    manager_port: u16,
    server_port: u16,
    child: Option<Child>,
    client: Connection,
    output: Option<CapturedOutput>,
}

impl Manager {
    /// Spawns and negotiates with a private host instance, returning
    /// once a live client connection exists (state `Bound`).
    pub async fn start(config: Config) -> Result<Manager> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| Error::PortBind(e.to_string()))?;
        let manager_port = listener
            .local_addr()
            .map_err(|e| Error::PortBind(e.to_string()))?
            .port();
        debug!(manager_port, "manager listening for the server callback");

        let total_attempts = config.license_retry_count + 1;
        let mut attempt = 0u32;
        let (child, server_port) = loop {
            attempt += 1;
            let mut child = spawn_host(&config, manager_port)?;
            debug!(attempt, "host process spawned; awaiting callback");

            match await_callback(&listener, config.callback_timeout).await {
                Callback::Received { bound: true, port } => break (child, port),
                Callback::Received { bound: false, .. } => {
                    let output = collect(child, true).await;
                    return Err(Error::StartupFailed {
                        code: None,
                        message: "Server could not find a port to bind to".into(),
                        output: Some(output),
                    });
                }
                Callback::Failed(msg) => {
                    let _ = collect(child, true).await;
                    return Err(Error::Callback(msg));
                }
                Callback::TimedOut => match child.try_wait() {
                    Ok(Some(status)) if status.code() == Some(config.license_exit_code) => {
                        // Reap this attempt before the next spawn.
                        let _ = child.wait_with_output().await;
                        if attempt >= total_attempts {
                            return Err(Error::LicenseExhausted { attempts: attempt });
                        }
                        info!(
                            "License error. Retrying in {} seconds... (attempt {} of {})",
                            config.license_retry_delay.as_secs(),
                            attempt,
                            total_attempts,
                        );
                        sleep(config.license_retry_delay).await;
                    }
                    Ok(Some(status)) => {
                        let code = status.code();
                        let output = collect(child, false).await;
                        return Err(Error::StartupFailed {
                            code,
                            message: "Host process exited before calling back".into(),
                            output: Some(output),
                        });
                    }
                    Ok(None) => {
                        // Alive but silent; kill it rather than leave a
                        // stalled host behind.
                        warn!("host process is alive but never called back; killing it");
                        let output = collect(child, true).await;
                        return Err(Error::StartupFailed {
                            code: None,
                            message: "Host process is alive but never called back".into(),
                            output: Some(output),
                        });
                    }
                    Err(e) => {
                        let _ = collect(child, true).await;
                        return Err(Error::Spawn(e.to_string()));
                    }
                },
            }
        };

        // Bound: the manager's own listener has served its purpose.
        drop(listener);
        info!(server_port, "server called back; connecting client");

        match Connection::connect_to(&config, server_port).await {
            Ok(connection) => Ok(Manager {
                config,
                state: State::Bound,
                manager_port,
                server_port,
                child: Some(child),
                client: connection,
                output: None,
            }),
            Err(e) => {
                // The server is (probably) alive behind a port we cannot
                // talk to; ask it to stop before reporting the original
                // failure.
                warn!("client connection failed; attempting emergency shutdown");
                emergency_shutdown(&config, server_port).await;
                let output = collect(child, true).await;
                Err(Error::Client { source: e, output: Some(output) })
            }
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The ephemeral port the callback arrived on.
    pub fn manager_port(&self) -> u16 {
        self.manager_port
    }

    /// The port the managed server bound.
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// The live client connection to the managed server.
    pub fn connection(&self) -> &Connection {
        &self.client
    }

    /// Output captured from the host process, available after shutdown.
    pub fn output(&self) -> Option<&CapturedOutput> {
        self.output.as_ref()
    }

    /// The configuration this session was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sends `shutdown`, reaps the subprocess, and returns its captured
    /// output. The session is `Closed` afterwards; the output stays
    /// available through [`Manager::output`].
    pub async fn shutdown(&mut self) -> Result<CapturedOutput> {
        self.state = State::ShuttingDown;
        // If the server never acknowledges, don't wait on a child that
        // has no reason to exit.
        let force_kill = match self.client.shutdown_server().await {
            Ok(farewell) => {
                debug!(%farewell, "server acknowledged shutdown");
                false
            }
            Err(e) => {
                warn!("shutdown request failed: {}", e);
                true
            }
        };
        let output = match self.child.take() {
            Some(child) => collect(child, force_kill).await,
            None => CapturedOutput::default(),
        };
        self.state = State::Closed;
        self.output = Some(output.clone());
        Ok(output)
    }
}

fn spawn_host(config: &Config, manager_port: u16) -> Result<Child> {
    Command::new(&config.host_exec)
        .args(&config.host_args)
        .arg(manager_port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Spawn(e.to_string()))
}

/// Waits for the server's one-shot `(bound, port)` status message.
async fn await_callback(listener: &TcpListener, limit: Duration) -> Callback {
    let exchange = async {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|e| e.to_string())?;
        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<Vec<u8>, String>(bytes)
    };
    match timeout(limit, exchange).await {
        Err(_) => Callback::TimedOut,
        Ok(Err(msg)) => Callback::Failed(msg),
        Ok(Ok(bytes)) => parse_callback(&bytes),
    }
}

fn parse_callback(bytes: &[u8]) -> Callback {
    let Ok(Value::List(items)) = telepack::decode_value(bytes) else {
        return Callback::Failed("callback payload did not decode".into());
    };
    match items.as_slice() {
        [Value::Bool(bound), Value::Int(port)] if *port >= 0 && *port <= u16::MAX as i64 => {
            Callback::Received { bound: *bound, port: *port as u16 }
        }
        _ => Callback::Failed("callback payload had the wrong shape".into()),
    }
}

/// Best-effort `shutdown` against a server the manager cannot otherwise
/// reach; failures are logged, not raised, because the caller is already
/// on an error path.
async fn emergency_shutdown(config: &Config, port: u16) {
    let connection = Connection::with_transport(
        Arc::new(TcpTransport::new(&config.host, port, config.socket_buffer)),
        config.max_message_bytes,
    );
    match connection.shutdown_server().await {
        Ok(_) => debug!("emergency shutdown delivered"),
        Err(e) => warn!("emergency shutdown failed: {}", e),
    }
}

/// Reaps the child and gathers everything it wrote. `kill` forces the
/// issue for processes that have not exited on their own.
async fn collect(mut child: Child, kill: bool) -> CapturedOutput {
    if kill {
        let _ = child.start_kill();
    }
    match child.wait_with_output().await {
        Ok(output) => CapturedOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(_) => CapturedOutput::default(),
    }
}
