//! # Host Interface
//!
//! The seam between the protocol core and the embedding application.
//! The core never sees the host's interpreter; it only needs "perform
//! this operation on an opaque object and give me a value or a fault".
//!
//! Operations that mutate host state (`call`) are routed through
//! [`Host::execute`] so the embedder can pin them to whatever execution
//! context it mandates — typically a single designated thread. The
//! dispatch side blocks until that execution completes or faults; this is
//! a hand-off, not fire-and-forget.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use telepack::RemoteFault;

/// Fault kinds the core itself produces. Hosts are free to use their own
/// vocabulary; these are the ones with protocol meaning.
pub mod kind {
    /// Operation not supported by the target object.
    pub const TYPE_ERROR: &str = "TypeError";
    /// Named attribute absent.
    pub const ATTRIBUTE_ERROR: &str = "AttributeError";
    /// Mapping key absent.
    pub const KEY_ERROR: &str = "KeyError";
    /// Global name absent — deliberately distinct from `KEY_ERROR` so a
    /// misspelled top-level name reads as "undefined", not "missing key".
    pub const NAME_ERROR: &str = "NameError";
    /// A reference pointed at an identity the table no longer holds.
    pub const REFERENCE_ERROR: &str = "ReferenceError";
    /// Module loading failed.
    pub const IMPORT_ERROR: &str = "ImportError";
    /// The host-side execution machinery itself failed.
    pub const RUNTIME_ERROR: &str = "RuntimeError";
}

/// Result of any host-side operation: a value, or a fault that travels
/// back to the client as data.
pub type FaultResult<T> = std::result::Result<T, RemoteFault>;

/// Shared handle to an opaque host object.
pub type HostObj = Arc<dyn HostObject>;

/// A value as the server sees it: the wire shapes, fully resolved, with
/// opaque host objects still attached. The conversion layer turns
/// `Object` leaves into table references on the way out and back into
/// objects on the way in.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<HostValue>),
    Set(Vec<HostValue>),
    Map(Vec<(HostValue, HostValue)>),
    Object(HostObj),
    Fault(RemoteFault),
}

impl HostValue {
    pub fn text(s: impl Into<String>) -> Self {
        HostValue::Text(s.into())
    }

    /// The text payload, if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HostValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Debug for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostValue::Null => write!(f, "Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Int(n) => write!(f, "Int({})", n),
            HostValue::Float(x) => write!(f, "Float({})", x),
            HostValue::Text(s) => write!(f, "Text({:?})", s),
            HostValue::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            HostValue::List(items) => f.debug_tuple("List").field(items).finish(),
            HostValue::Set(items) => f.debug_tuple("Set").field(items).finish(),
            HostValue::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            HostValue::Object(_) => write!(f, "Object(..)"),
            HostValue::Fault(fault) => write!(f, "Fault({})", fault),
        }
    }
}

fn unsupported(op: &str) -> RemoteFault {
    RemoteFault::new(kind::TYPE_ERROR, format!("object does not support {}", op))
}

/// The polymorphic capability interface: one method per protocol
/// operation. Implementations override what their object supports; the
/// defaults fault the way a dynamic host would for an unsupported
/// operation.
pub trait HostObject: Send + Sync {
    fn get_attr(&self, name: &str) -> FaultResult<HostValue> {
        Err(RemoteFault::new(
            kind::ATTRIBUTE_ERROR,
            format!("no attribute '{}'", name),
        ))
    }

    fn set_attr(&self, name: &str, _value: HostValue) -> FaultResult<()> {
        Err(RemoteFault::new(
            kind::ATTRIBUTE_ERROR,
            format!("cannot set attribute '{}'", name),
        ))
    }

    fn get_item(&self, _key: &HostValue) -> FaultResult<HostValue> {
        Err(unsupported("item access"))
    }

    fn set_item(&self, _key: HostValue, _value: HostValue) -> FaultResult<()> {
        Err(unsupported("item assignment"))
    }

    fn call(
        &self,
        _args: Vec<HostValue>,
        _kwargs: Vec<(String, HostValue)>,
    ) -> FaultResult<HostValue> {
        Err(unsupported("calling"))
    }

    fn len(&self) -> FaultResult<i64> {
        Err(unsupported("len()"))
    }

    /// The object's plain string form.
    fn to_text(&self) -> FaultResult<String>;

    /// The object's display form; defaults to the string form.
    fn to_repr(&self) -> FaultResult<String> {
        self.to_text()
    }

    /// Whether `value` is an instance of this (class-like) object.
    fn instance_check(&self, _value: &HostValue) -> FaultResult<bool> {
        Err(unsupported("instance checks"))
    }

    /// Whether `other` is a subclass of this (class-like) object.
    fn subclass_check(&self, _other: &HostValue) -> FaultResult<bool> {
        Err(unsupported("subclass checks"))
    }
}

/// A unit of work handed to the host's execution context.
pub type HostTask = Box<dyn FnOnce() -> FaultResult<HostValue> + Send>;

/// What the embedding application provides to run a server.
pub trait Host: Send + Sync + 'static {
    /// The host's addressable global namespace (the target of identity
    /// `-1`).
    fn globals(&self) -> HostObj;

    /// Loads a named module and returns it (typically as an opaque
    /// object, which the conversion layer turns into a fresh reference).
    fn import_module(&self, name: &str) -> FaultResult<HostValue> {
        Err(RemoteFault::new(
            kind::IMPORT_ERROR,
            format!("cannot import '{}'", name),
        ))
    }

    /// Runs `task` on whatever execution context the host mandates for
    /// safe mutation, blocking until it completes or faults.
    ///
    /// The default runs the task inline, which is correct for hosts
    /// without thread-affinity requirements.
    fn execute(&self, task: HostTask) -> FaultResult<HostValue> {
        task()
    }

    /// Interactive accept/deny for the `initiate` handshake. Consulted
    /// only when the verification policy requires it; the default
    /// accepts, matching hosts that cannot prompt.
    fn confirm_peer(&self, _origin: &str) -> bool {
        true
    }
}

enum Job {
    Run(HostTask, mpsc::Sender<FaultResult<HostValue>>),
    Stop,
}

/// A dedicated execution thread for hosts that require call affinity.
///
/// Tasks are submitted over a channel and executed in submission order on
/// one worker thread; `execute` blocks the caller until its task's reply
/// arrives, modeling the synchronous hand-off the protocol requires.
pub struct WorkerExecutor {
    tx: mpsc::Sender<Job>,
    worker: Option<thread::JoinHandle<()>>,
}

impl WorkerExecutor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    Job::Run(task, reply) => {
                        // The submitter may have given up; a dead reply
                        // channel is not the worker's problem.
                        let _ = reply.send(task());
                    }
                    Job::Stop => break,
                }
            }
        });
        Self { tx, worker: Some(worker) }
    }

    /// Submits a task and blocks until the worker finishes it.
    pub fn execute(&self, task: HostTask) -> FaultResult<HostValue> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Job::Run(task, reply_tx))
            .map_err(|_| RemoteFault::new(kind::RUNTIME_ERROR, "host executor is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| RemoteFault::new(kind::RUNTIME_ERROR, "host executor dropped the task"))?
    }
}

impl Default for WorkerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        let _ = self.tx.send(Job::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
