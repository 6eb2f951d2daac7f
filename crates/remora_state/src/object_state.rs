//! Per-identity change-tracking state.

use crate::error::{StateError, StateResult};
use remora_ops::Op;
use remora_value::{encode, Value};
use std::collections::{BTreeMap, VecDeque};

/// The tracked state of one logical object.
///
/// Three structures per identity:
///
/// - **server data** — attribute values exactly as last confirmed by the
///   server; only reconciliation writes here
/// - **pending-ops stack** — ordered layers of not-yet-confirmed
///   operations; the front layer belongs to the oldest in-flight save, the
///   back layer collects new mutations
/// - **object cache** — serialized snapshots of plain containers taken
///   when they became server data, for detecting in-place mutation that
///   bypassed the operation algebra
///
/// Invariant: the stack always holds at least one (possibly empty) layer.
#[derive(Debug, Default)]
pub struct ObjectState {
    server_data: BTreeMap<String, Value>,
    pending_ops: VecDeque<BTreeMap<String, Op>>,
    object_cache: BTreeMap<String, String>,
}

impl ObjectState {
    /// Creates empty state with a single empty pending layer.
    pub fn new() -> Self {
        let mut pending_ops = VecDeque::new();
        pending_ops.push_back(BTreeMap::new());
        Self {
            server_data: BTreeMap::new(),
            pending_ops,
            object_cache: BTreeMap::new(),
        }
    }

    /// Server-confirmed attribute values.
    pub fn server_data(&self) -> &BTreeMap<String, Value> {
        &self.server_data
    }

    /// Number of pending layers (at least one).
    pub fn layer_count(&self) -> usize {
        self.pending_ops.len()
    }

    /// The estimated value of one attribute: server data folded through
    /// every pending layer, oldest first.
    pub fn estimate_attribute(&self, attr: &str) -> StateResult<Option<Value>> {
        let mut estimate = self.server_data.get(attr).cloned();
        for layer in &self.pending_ops {
            if let Some(op) = layer.get(attr) {
                estimate = op.apply_to(estimate.as_ref())?;
            }
        }
        Ok(estimate)
    }

    /// The full estimated attribute map.
    ///
    /// Calling this twice without intervening mutation yields equal maps.
    pub fn estimate_attributes(&self) -> StateResult<BTreeMap<String, Value>> {
        let mut estimate = self.server_data.clone();
        for layer in &self.pending_ops {
            for (attr, op) in layer {
                match op.apply_to(estimate.get(attr))? {
                    Some(value) => {
                        estimate.insert(attr.clone(), value);
                    }
                    None => {
                        estimate.remove(attr);
                    }
                }
            }
        }
        Ok(estimate)
    }

    /// Merges an operation into the newest pending layer.
    ///
    /// `None` clears the attribute's slot (revert). A merge conflict
    /// propagates without touching the layer.
    pub fn set_pending_op(&mut self, attr: &str, op: Option<Op>) -> StateResult<()> {
        let layer = self
            .pending_ops
            .back_mut()
            .expect("pending stack is never empty");
        match op {
            None => {
                layer.remove(attr);
            }
            Some(op) => {
                let merged = op.merge_with(layer.get(attr))?;
                layer.insert(attr.to_string(), merged);
            }
        }
        Ok(())
    }

    /// The operation pending for an attribute in the newest layer.
    pub fn pending_op(&self, attr: &str) -> Option<&Op> {
        self.pending_ops.back().and_then(|layer| layer.get(attr))
    }

    /// Begins a save round trip: freezes the current mutations and opens a
    /// fresh layer for whatever happens while the save is in flight.
    pub fn push_pending_state(&mut self) {
        self.pending_ops.push_back(BTreeMap::new());
    }

    /// Retires the oldest pending layer and returns it.
    ///
    /// At least one (possibly empty) layer always remains.
    pub fn pop_pending_state(&mut self) -> BTreeMap<String, Op> {
        let popped = self.pending_ops.pop_front().unwrap_or_default();
        if self.pending_ops.is_empty() {
            self.pending_ops.push_back(BTreeMap::new());
        }
        popped
    }

    /// The oldest pending layer, cloned — the snapshot a beginning save
    /// serializes.
    pub fn first_pending_layer(&self) -> BTreeMap<String, Op> {
        self.pending_ops.front().cloned().unwrap_or_default()
    }

    /// Folds the oldest pending layer into the next one after a failed
    /// save, so the mutations are retried rather than lost.
    ///
    /// Where both layers hold an op for the same attribute, the newer op
    /// merges onto the popped older op per the merge matrix. The fold is
    /// computed before anything is replaced: a conflict leaves the stack
    /// unchanged.
    pub fn merge_first_pending_state(&mut self) -> StateResult<()> {
        if self.pending_ops.len() < 2 {
            return Ok(());
        }

        let failed = &self.pending_ops[0];
        let next = &self.pending_ops[1];
        let mut merged = failed.clone();
        for (attr, newer) in next {
            let composed = newer.merge_with(merged.get(attr))?;
            merged.insert(attr.clone(), composed);
        }

        self.pending_ops.pop_front();
        self.pending_ops[0] = merged;
        Ok(())
    }

    /// Writes reconciled changes into server data.
    ///
    /// A `None` change removes the attribute. Plain containers are
    /// snapshotted into the object cache for later dirtiness checks.
    pub fn commit_server_changes(
        &mut self,
        changes: BTreeMap<String, Option<Value>>,
    ) -> StateResult<()> {
        for (attr, change) in changes {
            match change {
                Some(value) => {
                    if value.is_plain_container() {
                        let serialized = serde_json::to_string(&encode(&value)?)
                            .map_err(|e| {
                                StateError::Value(remora_value::ValueError::invalid_payload(
                                    e.to_string(),
                                ))
                            })?;
                        self.object_cache.insert(attr.clone(), serialized);
                    } else {
                        self.object_cache.remove(&attr);
                    }
                    self.server_data.insert(attr, value);
                }
                None => {
                    self.server_data.remove(&attr);
                    self.object_cache.remove(&attr);
                }
            }
        }
        Ok(())
    }

    /// True if the attribute (or, with `None`, any attribute) has a
    /// pending op or a container mutated in place since its snapshot.
    pub fn is_dirty(&self, attr: Option<&str>) -> bool {
        match attr {
            Some(attr) => {
                self.pending_ops.iter().any(|layer| layer.contains_key(attr))
                    || self.container_changed(attr)
            }
            None => {
                self.pending_ops.iter().any(|layer| !layer.is_empty())
                    || self
                        .server_data
                        .keys()
                        .any(|attr| self.container_changed(attr))
            }
        }
    }

    /// Attributes whose container snapshots no longer match their current
    /// server data — mutations that bypassed the operation algebra and
    /// must ride along with the next save as implicit sets.
    pub fn dirty_containers(&self) -> Vec<(String, Value)> {
        self.server_data
            .iter()
            .filter(|(attr, _)| self.container_changed(attr))
            .map(|(attr, value)| (attr.clone(), value.clone()))
            .collect()
    }

    fn container_changed(&self, attr: &str) -> bool {
        let value = match self.server_data.get(attr) {
            Some(value) if value.is_plain_container() => value,
            _ => return false,
        };
        let current = match encode(value).ok().map(|e| e.to_string()) {
            Some(current) => current,
            None => return false,
        };
        match self.object_cache.get(attr) {
            Some(snapshot) => snapshot != &current,
            // A container with no snapshot was never committed through
            // reconciliation; treat it as clean.
            None => false,
        }
    }

    /// Direct mutable access to a server-data attribute, modelling
    /// application code mutating a container obtained via `get` in place.
    pub fn server_data_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.server_data
    }
}
