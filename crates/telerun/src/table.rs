//! # Object Table
//!
//! Server-side ownership of everything that cannot cross the wire
//! directly. Encoding a non-primitive result allocates an entry here and
//! sends back its identity; the client's proxy uses that identity for
//! every subsequent operation.
//!
//! ## Invariants
//!
//! - Identities increase monotonically and are never reused within one
//!   server lifetime; a stale identity resolves to not-found, never to
//!   the wrong object.
//! - Entries are released **only** by the explicit `del` action. A client
//!   that never deletes grows the table without bound; that is a
//!   deliberate, documented property of the protocol, not a leak to be
//!   patched with an eviction policy.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use telepack::ObjectId;

use crate::host::HostObj;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NotFound(ObjectId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "{} is not in the object table", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Owned arena of host objects, indexed by a monotonic counter.
///
/// Allocation and resolution are individually atomic; the sharded map
/// plus the atomic counter keep identity uniqueness even when the host
/// process itself is multi-threaded.
pub struct ObjectTable {
    objects: DashMap<ObjectId, HostObj>,
    next_id: AtomicI64,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicI64::new(0),
        }
    }

    /// Stores an object and returns its fresh identity.
    ///
    /// Identities are never reused, and never `ObjectId::GLOBALS`.
    pub fn allocate(&self, object: HostObj) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.objects.insert(id, object);
        id
    }

    /// Looks up an identity.
    ///
    /// `ObjectId::GLOBALS` is not a table entry; the dispatcher resolves
    /// it against the host before ever reaching here.
    pub fn resolve(&self, id: ObjectId) -> Result<HostObj> {
        self.objects
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::NotFound(id))
    }

    /// Removes an entry; only the explicit `del` action calls this.
    pub fn release(&self, id: ObjectId) -> Result<()> {
        self.objects.remove(&id).ok_or(Error::NotFound(id))?;
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}
