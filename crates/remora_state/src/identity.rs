//! Object identity and local id allocation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Attribute names managed by the engine, rejected as user attributes.
pub const RESERVED_ATTRIBUTES: &[&str] = &["objectId", "createdAt", "updatedAt", "className"];

/// The id half of an identity: server-assigned once persisted, a
/// process-unique placeholder before the first save.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectId {
    /// Server-assigned id.
    Server(String),
    /// Locally allocated placeholder, replaced on first successful save.
    Local(String),
}

impl ObjectId {
    /// Returns the server id, if assigned.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            ObjectId::Server(id) => Some(id),
            ObjectId::Local(_) => None,
        }
    }

    /// True if this is still a local placeholder.
    pub fn is_local(&self) -> bool {
        matches!(self, ObjectId::Local(_))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Server(id) | ObjectId::Local(id) => write!(f, "{id}"),
        }
    }
}

/// The `(class name, id)` pair uniquely naming a logical record.
///
/// Identity is the key into the state arena and, once persisted, into the
/// local datastore. The flat form is `ClassName_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Class name.
    pub class_name: String,
    /// Server or local id.
    pub id: ObjectId,
}

impl Identity {
    /// Creates an identity with a server id.
    pub fn persisted(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: ObjectId::Server(object_id.into()),
        }
    }

    /// Creates an identity with a local placeholder id.
    pub fn local(class_name: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: ObjectId::Local(local_id.into()),
        }
    }

    /// Returns the flat identity key (`ClassName_id`).
    pub fn key(&self) -> String {
        format!("{}_{}", self.class_name, self.id)
    }

    /// Returns the server id, if assigned.
    pub fn object_id(&self) -> Option<&str> {
        self.id.server_id()
    }

    /// True if the record has never been saved.
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    /// The identity this one becomes when the server assigns `object_id`.
    pub fn with_server_id(&self, object_id: impl Into<String>) -> Self {
        Self {
            class_name: self.class_name.clone(),
            id: ObjectId::Server(object_id.into()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Allocator for process-unique, monotonically increasing local ids.
///
/// The uuid fragment namespaces ids across processes sharing a datastore;
/// the counter makes allocation order observable, which keeps arena and
/// datastore key migration deterministic.
#[derive(Debug)]
pub struct LocalIdAllocator {
    prefix: String,
    next: AtomicU64,
}

impl LocalIdAllocator {
    /// Creates an allocator with a fresh process-unique prefix.
    pub fn new() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            prefix: format!("local_{}", &uuid[..10]),
            next: AtomicU64::new(0),
        }
    }

    /// Allocates the next local id.
    pub fn allocate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}{n}", self.prefix)
    }
}

impl Default for LocalIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
