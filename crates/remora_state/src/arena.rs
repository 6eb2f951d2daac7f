//! The state arena: explicit, deterministically keyed object state.

use crate::error::StateResult;
use crate::object_state::ObjectState;
use parking_lot::RwLock;
use remora_ops::Op;
use remora_value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// How local proxies sharing an identity alias state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceMode {
    /// All proxies of one identity share a single arena slot; mutations are
    /// instantly visible across aliases.
    #[default]
    Single,
    /// Each proxy owns an independent slot, duplicated on `new_instance`,
    /// resynchronized only by fetch.
    Unique,
}

/// Arena of per-identity object states.
///
/// Slots are indexed by a stable identity key with explicit lifecycle:
/// states are created lazily on first touch, removed on destroy, and
/// renamed (with an alias left behind) when a local id migrates to a
/// server id. Nothing here depends on garbage collection.
#[derive(Debug, Default)]
pub struct StateArena {
    slots: RwLock<HashMap<String, ObjectState>>,
    aliases: RwLock<HashMap<String, String>>,
    mode: InstanceMode,
    instance_counter: AtomicU64,
}

impl StateArena {
    /// Creates an arena in single-instance mode.
    pub fn new() -> Self {
        Self::with_mode(InstanceMode::Single)
    }

    /// Creates an arena with an explicit aliasing mode.
    pub fn with_mode(mode: InstanceMode) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            mode,
            instance_counter: AtomicU64::new(0),
        }
    }

    /// The aliasing mode this arena was created with.
    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    /// Follows migration aliases to the current key for a slot.
    pub fn resolve_key(&self, key: &str) -> String {
        let aliases = self.aliases.read();
        let mut current = key;
        // Alias chains stay short: local key -> server key.
        while let Some(next) = aliases.get(current) {
            current = next;
        }
        current.to_string()
    }

    /// Allocates a distinct slot key for a proxy in unique-instance mode.
    pub fn unique_slot(&self, base_key: &str) -> String {
        let n = self.instance_counter.fetch_add(1, Ordering::SeqCst);
        format!("{base_key}#{n}")
    }

    fn with_state<R>(&self, key: &str, f: impl FnOnce(&ObjectState) -> R) -> R {
        let key = self.resolve_key(key);
        let mut slots = self.slots.write();
        let state = slots.entry(key).or_insert_with(ObjectState::new);
        f(state)
    }

    fn with_state_mut<R>(&self, key: &str, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        let key = self.resolve_key(key);
        let mut slots = self.slots.write();
        let state = slots.entry(key).or_insert_with(ObjectState::new);
        f(state)
    }

    /// Estimated value of one attribute.
    pub fn estimate_attribute(&self, key: &str, attr: &str) -> StateResult<Option<Value>> {
        self.with_state(key, |state| state.estimate_attribute(attr))
    }

    /// Full estimated attribute map.
    pub fn estimate_attributes(&self, key: &str) -> StateResult<BTreeMap<String, Value>> {
        self.with_state(key, |state| state.estimate_attributes())
    }

    /// Server-confirmed attribute values, cloned.
    pub fn server_data(&self, key: &str) -> BTreeMap<String, Value> {
        self.with_state(key, |state| state.server_data().clone())
    }

    /// Merges an operation into the newest pending layer for an identity.
    pub fn set_pending_op(&self, key: &str, attr: &str, op: Option<Op>) -> StateResult<()> {
        self.with_state_mut(key, |state| state.set_pending_op(attr, op))
    }

    /// The operation pending for an attribute in the newest layer.
    pub fn pending_op(&self, key: &str, attr: &str) -> Option<Op> {
        self.with_state(key, |state| state.pending_op(attr).cloned())
    }

    /// Begins a save round trip for an identity.
    pub fn push_pending_state(&self, key: &str) {
        self.with_state_mut(key, |state| state.push_pending_state());
    }

    /// Retires the oldest pending layer for an identity.
    pub fn pop_pending_state(&self, key: &str) -> BTreeMap<String, Op> {
        self.with_state_mut(key, |state| state.pop_pending_state())
    }

    /// Snapshot of the oldest pending layer (what a running save sends).
    pub fn first_pending_layer(&self, key: &str) -> BTreeMap<String, Op> {
        self.with_state(key, |state| state.first_pending_layer())
    }

    /// Folds the oldest layer forward after a failed save.
    pub fn merge_first_pending_state(&self, key: &str) -> StateResult<()> {
        self.with_state_mut(key, |state| state.merge_first_pending_state())
    }

    /// Writes reconciled server changes for an identity.
    pub fn commit_server_changes(
        &self,
        key: &str,
        changes: BTreeMap<String, Option<Value>>,
    ) -> StateResult<()> {
        self.with_state_mut(key, |state| state.commit_server_changes(changes))
    }

    /// Dirtiness check for one attribute or the whole identity.
    pub fn is_dirty(&self, key: &str, attr: Option<&str>) -> bool {
        self.with_state(key, |state| state.is_dirty(attr))
    }

    /// Containers mutated in place since their snapshots.
    pub fn dirty_containers(&self, key: &str) -> Vec<(String, Value)> {
        self.with_state(key, |state| state.dirty_containers())
    }

    /// Number of pending layers for an identity.
    pub fn layer_count(&self, key: &str) -> usize {
        self.with_state(key, |state| state.layer_count())
    }

    /// Runs a closure with mutable access to an identity's state.
    ///
    /// Escape hatch for tests and for modelling in-place container
    /// mutation; production mutation goes through the typed methods.
    pub fn with_state_mut_raw<R>(&self, key: &str, f: impl FnOnce(&mut ObjectState) -> R) -> R {
        self.with_state_mut(key, f)
    }

    /// Removes an identity's state, returning it if present.
    pub fn remove_state(&self, key: &str) -> Option<ObjectState> {
        let key = self.resolve_key(key);
        debug!(key = %key, "evicting state slot");
        self.slots.write().remove(&key)
    }

    /// Renames a slot when a local id migrates to a server id.
    ///
    /// The old key becomes an alias so proxies created before the
    /// migration keep resolving to the same state. If the target slot
    /// already exists, its server-confirmed data is authoritative and the
    /// old slot is discarded.
    pub fn migrate(&self, old_key: &str, new_key: &str) {
        if old_key == new_key {
            return;
        }
        let old_key = self.resolve_key(old_key);
        debug!(from = %old_key, to = %new_key, "migrating state slot");

        let mut slots = self.slots.write();
        if let Some(state) = slots.remove(&old_key) {
            slots.entry(new_key.to_string()).or_insert(state);
        }
        drop(slots);

        self.aliases
            .write()
            .insert(old_key, new_key.to_string());
    }

    /// Duplicates a slot's state into a fresh unique-instance slot and
    /// returns the new key.
    pub fn duplicate_slot(&self, key: &str) -> String {
        let source = self.resolve_key(key);
        let new_key = self.unique_slot(&source);

        let mut slots = self.slots.write();
        let copy = match slots.get(&source) {
            Some(state) => {
                let mut copy = ObjectState::new();
                let changes: BTreeMap<_, _> = state
                    .server_data()
                    .iter()
                    .map(|(k, v)| (k.clone(), Some(v.clone())))
                    .collect();
                copy.commit_server_changes(changes)
                    .expect("copying committed data cannot fail");
                copy
            }
            None => ObjectState::new(),
        };
        slots.insert(new_key.clone(), copy);
        new_key
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// True if the arena holds no state.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
