//! # Configuration
//!
//! Tunables for both ends of the protocol: where the host executable
//! lives, how large a single socket message may grow before chunking,
//! which ports to scan, and how patiently the manager retries licensing
//! failures. Defaults match the mature deployment; every numeric knob can
//! also come from the environment.

use std::time::Duration;

/// Environment variable names recognized by [`Config::from_env`].
pub const ENV_HOST_EXEC: &str = "TELE_HOST_EXEC";
pub const ENV_SOCKET_BUFFER: &str = "TELE_SOCKET_BUFFER";
pub const ENV_MAX_MESSAGE_BYTES: &str = "TELE_MAX_MESSAGE_BYTES";
pub const ENV_PORT_START: &str = "TELE_PORT_START";
pub const ENV_PORT_END: &str = "TELE_PORT_END";
pub const ENV_LICENSE_RETRY_COUNT: &str = "TELE_LICENSE_RETRY_COUNT";
pub const ENV_LICENSE_RETRY_DELAY: &str = "TELE_LICENSE_RETRY_DELAY";

/// Runtime configuration shared by client, server, and manager.
#[derive(Debug, Clone)]
pub struct Config {
    /// Command used to launch the host application.
    pub host_exec: String,
    /// Launch flags placed before the manager callback port (typically
    /// the host's non-interactive/threaded-mode switches).
    pub host_args: Vec<String>,
    /// Hostname clients connect to.
    pub host: String,
    /// Read-buffer sizing hint for socket transfers.
    pub socket_buffer: usize,
    /// Serialized frames above this many bytes are chunked.
    pub max_message_bytes: usize,
    /// Inclusive port range scanned by server binding and client
    /// discovery.
    pub port_start: u16,
    pub port_end: u16,
    /// Subprocess exit code that signals a licensing failure.
    pub license_exit_code: i32,
    /// How many times a licensing failure is retried (total attempts are
    /// `license_retry_count + 1`).
    pub license_retry_count: u32,
    /// Pause between licensing retries.
    pub license_retry_delay: Duration,
    /// How long the manager waits for the server's one-shot callback.
    pub callback_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_exec: "tele-host".into(),
            host_args: Vec::new(),
            host: "localhost".into(),
            socket_buffer: 4096,
            max_message_bytes: 2048,
            port_start: 54200,
            port_end: 54300,
            license_exit_code: 100,
            license_retry_count: 5,
            license_retry_delay: Duration::from_secs(5),
            callback_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from the defaults, overridden by any
    /// recognized environment variables. Malformed numeric values fall
    /// back to the default rather than failing.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(exec) = std::env::var(ENV_HOST_EXEC) {
            if !exec.is_empty() {
                config.host_exec = exec;
            }
        }
        if let Some(n) = read_env(ENV_SOCKET_BUFFER) {
            config.socket_buffer = n;
        }
        if let Some(n) = read_env(ENV_MAX_MESSAGE_BYTES) {
            config.max_message_bytes = n;
        }
        if let Some(n) = read_env(ENV_PORT_START) {
            config.port_start = n;
        }
        if let Some(n) = read_env(ENV_PORT_END) {
            config.port_end = n;
        }
        if let Some(n) = read_env(ENV_LICENSE_RETRY_COUNT) {
            config.license_retry_count = n;
        }
        if let Some(secs) = read_env(ENV_LICENSE_RETRY_DELAY) {
            config.license_retry_delay = Duration::from_secs(secs);
        }
        config
    }

    pub fn host_exec(mut self, exec: impl Into<String>) -> Self {
        self.host_exec = exec.into();
        self
    }

    pub fn host_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.host_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.port_start = start;
        self.port_end = end;
        self
    }

    /// A fixed port skips scanning entirely.
    pub fn fixed_port(self, port: u16) -> Self {
        self.port_range(port, port)
    }

    pub fn license_retries(mut self, count: u32, delay: Duration) -> Self {
        self.license_retry_count = count;
        self.license_retry_delay = delay;
        self
    }

    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// The inclusive scan range as an iterator.
    pub fn ports(&self) -> std::ops::RangeInclusive<u16> {
        self.port_start..=self.port_end
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
