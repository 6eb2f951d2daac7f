//! The application-facing object proxy.

use crate::arena::{InstanceMode, StateArena};
use crate::error::{StateError, StateResult};
use crate::identity::{Identity, LocalIdAllocator, RESERVED_ATTRIBUTES};
use parking_lot::RwLock;
use remora_ops::{Op, RelationOp};
use remora_value::{ObjectData, Pointer, Value};
use std::sync::Arc;

/// A local proxy of a remote record.
///
/// The proxy itself holds no attribute data: every read and mutation goes
/// through the shared [`StateArena`]. Mutators build operations and merge
/// them into the identity's newest pending layer; a merge conflict
/// surfaces immediately and mutates nothing.
#[derive(Debug, Clone)]
pub struct RemoraObject {
    arena: Arc<StateArena>,
    identity: Arc<RwLock<Identity>>,
    slot: String,
}

impl RemoraObject {
    /// Creates a new, never-saved object with a freshly allocated local id.
    pub fn new(arena: Arc<StateArena>, class_name: &str, allocator: &LocalIdAllocator) -> Self {
        let identity = Identity::local(class_name, allocator.allocate());
        let slot = Self::slot_for(&arena, &identity);
        Self {
            arena,
            identity: Arc::new(RwLock::new(identity)),
            slot,
        }
    }

    /// Creates a proxy for an already-persisted identity.
    pub fn with_id(arena: Arc<StateArena>, class_name: &str, object_id: &str) -> Self {
        let identity = Identity::persisted(class_name, object_id);
        let slot = Self::slot_for(&arena, &identity);
        Self {
            arena,
            identity: Arc::new(RwLock::new(identity)),
            slot,
        }
    }

    /// Builds a proxy from decoded server data, committing the attributes
    /// as server-confirmed state.
    pub fn from_data(arena: Arc<StateArena>, data: &ObjectData) -> StateResult<Self> {
        let object = match &data.object_id {
            Some(id) => Self::with_id(arena, &data.class_name, id),
            None => {
                return Err(StateError::MissingObjectId {
                    class_name: data.class_name.clone(),
                })
            }
        };
        let changes = data
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        object.arena.commit_server_changes(&object.slot, changes)?;
        Ok(object)
    }

    fn slot_for(arena: &StateArena, identity: &Identity) -> String {
        match arena.mode() {
            InstanceMode::Single => identity.key(),
            InstanceMode::Unique => arena.unique_slot(&identity.key()),
        }
    }

    /// The class name of this object.
    pub fn class_name(&self) -> String {
        self.identity.read().class_name.clone()
    }

    /// The server id, if the object has been saved.
    pub fn object_id(&self) -> Option<String> {
        self.identity.read().object_id().map(str::to_string)
    }

    /// The current identity.
    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// The arena slot key this proxy reads and writes.
    pub fn slot_key(&self) -> String {
        self.arena.resolve_key(&self.slot)
    }

    /// The arena backing this proxy.
    pub fn arena(&self) -> &Arc<StateArena> {
        &self.arena
    }

    fn validate_attribute(attr: &str) -> StateResult<()> {
        if attr.is_empty() || RESERVED_ATTRIBUTES.contains(&attr) {
            return Err(StateError::invalid_attribute_name(attr));
        }
        Ok(())
    }

    /// The estimated value of an attribute.
    pub fn get(&self, attr: &str) -> StateResult<Option<Value>> {
        Ok(self.arena.estimate_attribute(&self.slot, attr)?)
    }

    /// The full estimated attribute map.
    pub fn attributes(&self) -> StateResult<std::collections::BTreeMap<String, Value>> {
        Ok(self.arena.estimate_attributes(&self.slot)?)
    }

    /// Sets an attribute.
    pub fn set(&self, attr: &str, value: impl Into<Value>) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::Set(value.into())))
    }

    /// Deletes an attribute.
    pub fn unset(&self, attr: &str) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        self.arena.set_pending_op(&self.slot, attr, Some(Op::Unset))
    }

    /// Increments a numeric attribute.
    pub fn increment(&self, attr: &str, amount: f64) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::Increment(amount)))
    }

    /// Appends elements to an array attribute.
    pub fn add(&self, attr: &str, items: Vec<Value>) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::Add(items)))
    }

    /// Appends elements not already present to an array attribute.
    pub fn add_unique(&self, attr: &str, items: Vec<Value>) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::add_unique(items)))
    }

    /// Removes all occurrences of elements from an array attribute.
    pub fn remove_all(&self, attr: &str, items: Vec<Value>) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::Remove(items)))
    }

    /// Adds members to a relation attribute.
    pub fn add_relation(&self, attr: &str, members: &[Pointer]) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        let op = RelationOp::new(members, &[])?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::Relation(op)))
    }

    /// Removes members from a relation attribute.
    pub fn remove_relation(&self, attr: &str, members: &[Pointer]) -> StateResult<()> {
        Self::validate_attribute(attr)?;
        let op = RelationOp::new(&[], members)?;
        self.arena
            .set_pending_op(&self.slot, attr, Some(Op::Relation(op)))
    }

    /// Discards the pending mutation of one attribute in the newest layer.
    pub fn revert(&self, attr: &str) -> StateResult<()> {
        self.arena.set_pending_op(&self.slot, attr, None)
    }

    /// True if the attribute (or any attribute) has unsaved changes.
    pub fn is_dirty(&self, attr: Option<&str>) -> bool {
        self.arena.is_dirty(&self.slot, attr)
    }

    /// A bare pointer to this object. Fails before the first save.
    pub fn to_pointer(&self) -> StateResult<Pointer> {
        let identity = self.identity.read();
        match identity.object_id() {
            Some(id) => Ok(Pointer::new(identity.class_name.clone(), id)),
            None => Err(StateError::MissingObjectId {
                class_name: identity.class_name.clone(),
            }),
        }
    }

    /// A pointer carrying the current id — the local placeholder when the
    /// object has never been saved. Local references are resolved to
    /// server ids at save-payload encoding time.
    pub fn to_reference(&self) -> Pointer {
        let identity = self.identity.read();
        Pointer::new(identity.class_name.clone(), identity.id.to_string())
    }

    /// The estimated state of this object as decoded object data.
    pub fn to_data(&self) -> StateResult<ObjectData> {
        let identity = self.identity.read();
        let mut data = ObjectData::new(identity.class_name.clone());
        data.object_id = identity.object_id().map(str::to_string);
        drop(identity);
        data.attributes = self.arena.estimate_attributes(&self.slot)?;
        Ok(data)
    }

    /// Records a server-assigned id, migrating the arena slot (and leaving
    /// an alias for proxies still holding the local key).
    pub fn assign_server_id(&self, object_id: &str) {
        let mut identity = self.identity.write();
        if identity.object_id() == Some(object_id) {
            return;
        }
        let migrated = identity.with_server_id(object_id);
        self.arena.migrate(&identity.key(), &migrated.key());
        *identity = migrated;
    }

    /// Duplicates this proxy into an independent instance (unique-instance
    /// mode); in single-instance mode the copy shares state by design.
    pub fn new_instance(&self) -> Self {
        let slot = match self.arena.mode() {
            InstanceMode::Single => self.slot.clone(),
            InstanceMode::Unique => self.arena.duplicate_slot(&self.slot),
        };
        Self {
            arena: Arc::clone(&self.arena),
            identity: Arc::new(RwLock::new(self.identity.read().clone())),
            slot,
        }
    }
}
