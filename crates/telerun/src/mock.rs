//! Mock transports for testing.
//!
//! These are used internally by the test suite and are not part of the
//! public API.

use std::sync::Arc;
use std::sync::Mutex;

use crate::server::Session;
use crate::transport;
use crate::transport::Transport;

/// A request-response mock driven by a closure.
pub struct CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    handler: F,
}

impl<F> CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait::async_trait]
impl<F> Transport for CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync + 'static,
{
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        (self.handler)(payload)
    }
}

/// An in-memory transport wired straight to a server [`Session`].
///
/// Exercises the full frame machinery — chunking included — without a
/// socket in sight.
pub struct SessionTransport {
    session: Arc<Mutex<Session>>,
}

impl SessionTransport {
    pub fn new(session: Session) -> Self {
        Self { session: Arc::new(Mutex::new(session)) }
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        self.session.clone()
    }
}

#[async_trait::async_trait]
impl Transport for SessionTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let mut session = self.session.lock().unwrap();
        let (reply, _control) = session
            .handle_bytes(payload)
            .map_err(|e| transport::Error::Io(e.to_string()))?;
        Ok(reply)
    }
}
