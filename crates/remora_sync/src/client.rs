//! The sync context: ties state, datastore, queries, and transport
//! together behind the save/fetch/destroy reconciliation protocol.

use crate::batch::{expand_graph, is_local_id, plan_waves, MAX_BATCH_SIZE};
use crate::error::{ObjectFailure, SyncError, SyncResult};
use crate::queue::TaskQueue;
use crate::transport::{RestTransport, SaveCommand, SaveOutcome};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use remora_datastore::{LocalDatastore, StorageAdapter};
use remora_ops::{op_to_wire, Op};
use remora_query::{QueryDescription, QueryEvaluator};
use remora_state::{
    ClassRegistry, InstanceMode, LocalIdAllocator, RemoraObject, StateArena, StateError,
};
use remora_value::{decode, encode, ObjectData, Value};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// A configured client context.
///
/// Owns the state arena, the local-id bookkeeping, the offline datastore
/// and query evaluator, the per-identity task queue, and the transport.
/// All proxies created through one context share these resources.
pub struct Context {
    arena: Arc<StateArena>,
    allocator: LocalIdAllocator,
    registry: ClassRegistry,
    datastore: Arc<LocalDatastore>,
    evaluator: QueryEvaluator,
    transport: Arc<dyn RestTransport>,
    queue: TaskQueue,
    /// Unsaved proxies by local id, for graph discovery.
    locals: RwLock<HashMap<String, RemoraObject>>,
    /// Local ids that have been assigned server ids.
    resolved: RwLock<HashMap<String, String>>,
}

struct PreparedSave {
    object: RemoraObject,
    key: String,
    command: SaveCommand,
    sent_containers: Vec<(String, Value)>,
}

impl Context {
    /// Creates a single-instance context.
    pub fn new(transport: Arc<dyn RestTransport>, adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_mode(InstanceMode::Single, transport, adapter)
    }

    /// Creates a context with an explicit instance-aliasing mode.
    pub fn with_mode(
        mode: InstanceMode,
        transport: Arc<dyn RestTransport>,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Self {
        let datastore = Arc::new(LocalDatastore::new(adapter));
        Self {
            arena: Arc::new(StateArena::with_mode(mode)),
            allocator: LocalIdAllocator::new(),
            registry: ClassRegistry::new(),
            evaluator: QueryEvaluator::new(Arc::clone(&datastore)),
            datastore,
            transport,
            queue: TaskQueue::new(),
            locals: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// The shared state arena.
    pub fn arena(&self) -> &Arc<StateArena> {
        &self.arena
    }

    /// The offline datastore.
    pub fn datastore(&self) -> &Arc<LocalDatastore> {
        &self.datastore
    }

    /// The class registry.
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Creates a new, never-saved object of a class, seeded with the
    /// registered class defaults.
    pub fn new_object(&self, class_name: &str) -> RemoraObject {
        let object = RemoraObject::new(Arc::clone(&self.arena), class_name, &self.allocator);
        for (attr, value) in self.registry.resolve(class_name).default_attributes() {
            if let Err(error) = object.set(&attr, value) {
                warn!(class = class_name, attr = %attr, error = %error, "bad class default");
            }
        }
        let local_id = object.identity().id.to_string();
        self.locals.write().insert(local_id, object.clone());
        object
    }

    /// Creates a proxy for an already-persisted identity.
    pub fn object_with_id(&self, class_name: &str, object_id: &str) -> RemoraObject {
        RemoraObject::with_id(Arc::clone(&self.arena), class_name, object_id)
    }

    // ---- save -----------------------------------------------------------

    fn resolve_local_pointers(&self, value: &mut serde_json::Value) -> SyncResult<()> {
        match value {
            serde_json::Value::Object(map) => {
                if map.get("__type").and_then(|t| t.as_str()) == Some("Pointer") {
                    let id = map
                        .get("objectId")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if is_local_id(&id) {
                        match self.resolved.read().get(&id) {
                            Some(server_id) => {
                                map.insert("objectId".into(), json!(server_id));
                            }
                            None => {
                                let class_name = map
                                    .get("className")
                                    .and_then(|c| c.as_str())
                                    .unwrap_or_default()
                                    .to_string();
                                return Err(SyncError::CannotPointToUnsaved { class_name });
                            }
                        }
                    }
                }
                for (_, nested) in map.iter_mut() {
                    self.resolve_local_pointers(nested)?;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.resolve_local_pointers(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn encode_payload(
        &self,
        layer: &BTreeMap<String, Op>,
        containers: &[(String, Value)],
    ) -> SyncResult<serde_json::Value> {
        let mut body = serde_json::Map::new();
        for (attr, op) in layer {
            body.insert(attr.clone(), op_to_wire(op)?);
        }
        // Containers mutated in place ride along as implicit sets, unless
        // an explicit op already claimed the attribute.
        for (attr, value) in containers {
            if !body.contains_key(attr) {
                body.insert(attr.clone(), encode(value)?);
            }
        }
        let mut body = serde_json::Value::Object(body);
        self.resolve_local_pointers(&mut body)?;
        Ok(body)
    }

    /// Freezes the current mutations into a save snapshot. The pending
    /// push happens before the network fires, so mutations made while the
    /// save is in flight land in a fresh layer.
    fn prepare_save(&self, object: &RemoraObject) -> SyncResult<PreparedSave> {
        let key = object.slot_key();
        self.arena.push_pending_state(&key);
        let layer = self.arena.first_pending_layer(&key);
        let containers = self.arena.dirty_containers(&key);

        match self.encode_payload(&layer, &containers) {
            Ok(body) => Ok(PreparedSave {
                command: SaveCommand {
                    class_name: object.class_name(),
                    object_id: object.object_id(),
                    body,
                },
                object: object.clone(),
                key,
                sent_containers: containers,
            }),
            Err(error) => {
                // Unfreeze: fold the snapshot back so nothing is lost.
                if let Err(fold_error) = self.arena.merge_first_pending_state(&key) {
                    warn!(key = %key, error = %fold_error, "failed to fold back pending layer");
                }
                Err(error)
            }
        }
    }

    fn decode_server_attribute(attr: &str, raw: &serde_json::Value) -> SyncResult<Value> {
        if attr == "createdAt" || attr == "updatedAt" {
            if let Some(iso) = raw.as_str() {
                let parsed = DateTime::parse_from_rfc3339(iso)
                    .map_err(|_| remora_value::ValueError::invalid_date(iso))?
                    .with_timezone(&Utc);
                return Ok(Value::Date(parsed));
            }
        }
        Ok(decode(raw)?)
    }

    /// The server-confirmed view of an object, as stored offline.
    fn server_view(&self, object: &RemoraObject) -> ObjectData {
        let identity = object.identity();
        let mut data = ObjectData::new(identity.class_name.clone());
        data.object_id = identity.object_id().map(str::to_string);
        data.attributes = self.arena.server_data(&object.slot_key());
        data
    }

    fn apply_save_outcome(
        &self,
        prepared: &PreparedSave,
        outcome: &SaveOutcome,
    ) -> SyncResult<()> {
        let key = &prepared.key;
        let retired = self.arena.pop_pending_state(key);

        let mut changes: BTreeMap<String, Option<Value>> = BTreeMap::new();
        // The server does not echo plain sets and unsets; they resolve
        // locally. Everything the response does carry wins below.
        for (attr, op) in &retired {
            if !outcome.attributes.contains_key(attr) {
                changes.insert(attr.clone(), op.apply_to(None)?);
            }
        }
        for (attr, raw) in &outcome.attributes {
            if attr == "objectId" {
                continue;
            }
            changes.insert(attr.clone(), Some(Self::decode_server_attribute(attr, raw)?));
        }
        for (attr, value) in &prepared.sent_containers {
            changes
                .entry(attr.clone())
                .or_insert_with(|| Some(value.clone()));
        }
        self.arena.commit_server_changes(key, changes)?;

        if let Some(server_id) = &outcome.object_id {
            let identity = prepared.object.identity();
            if identity.is_local() {
                let local_id = identity.id.to_string();
                let old_key = identity.key();
                prepared.object.assign_server_id(server_id);
                self.resolved
                    .write()
                    .insert(local_id.clone(), server_id.clone());
                self.locals.write().remove(&local_id);
                self.datastore
                    .update_object_id(&old_key, &self.server_view(&prepared.object))?;
            }
        }

        self.datastore
            .update_from_server(&self.server_view(&prepared.object))?;
        debug!(key = %prepared.object.slot_key(), "save committed");
        Ok(())
    }

    fn fold_back(&self, key: &str) {
        if let Err(error) = self.arena.merge_first_pending_state(key) {
            warn!(key = %key, error = %error, "failed to fold back pending layer");
        }
    }

    /// Saves one object (and, transitively, any unsaved children it
    /// references).
    pub fn save(&self, object: &RemoraObject) -> SyncResult<()> {
        match self.save_all(std::slice::from_ref(object)) {
            Ok(()) => Ok(()),
            Err(SyncError::Aggregate { mut failures }) if failures.len() == 1 => {
                Err(failures.remove(0).error)
            }
            Err(other) => Err(other),
        }
    }

    /// Saves a set of objects: unsaved children first, batched at most
    /// [`MAX_BATCH_SIZE`] per request, per-identity ordering preserved.
    ///
    /// Partial failure completes the unaffected members and reports an
    /// aggregate error with one entry per failed member; every failed
    /// member's mutations fold back into its next pending layer.
    pub fn save_all(&self, roots: &[RemoraObject]) -> SyncResult<()> {
        let locals = self.locals.read().clone();
        let lookup = move |id: &str| locals.get(id).cloned();
        let graph = expand_graph(roots, &lookup)?;
        let waves = plan_waves(graph, &self.resolved.read().clone())?;

        let mut failures: Vec<ObjectFailure> = Vec::new();
        for wave in waves {
            for chunk in wave.chunks(MAX_BATCH_SIZE) {
                self.dispatch_chunk(chunk, &mut failures);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Aggregate { failures })
        }
    }

    fn dispatch_chunk(&self, chunk: &[RemoraObject], failures: &mut Vec<ObjectFailure>) {
        // Lanes are taken in key order so concurrent graph saves cannot
        // deadlock; holding every member's lane is the batched equivalent
        // of the per-object ready gate.
        let mut members: Vec<&RemoraObject> = chunk.iter().collect();
        members.sort_by_key(|object| object.slot_key());
        let _guards: Vec<_> = members
            .iter()
            .map(|object| self.queue.acquire(&object.slot_key()))
            .collect();

        let mut prepared = Vec::new();
        for object in members {
            match self.prepare_save(object) {
                Ok(p) => prepared.push(p),
                Err(error) => failures.push(ObjectFailure {
                    key: object.slot_key(),
                    error,
                }),
            }
        }
        if prepared.is_empty() {
            return;
        }

        debug!(members = prepared.len(), "dispatching save batch");
        let outcomes = if prepared.len() == 1 {
            vec![self.transport.save_object(&prepared[0].command)]
        } else {
            let commands: Vec<SaveCommand> =
                prepared.iter().map(|p| p.command.clone()).collect();
            match self.transport.save_batch(&commands) {
                Ok(outcomes) => outcomes,
                Err(error) => {
                    // The whole round trip failed; every member folds back
                    // and reports the transport failure.
                    let message = error.to_string();
                    for p in &prepared {
                        self.fold_back(&p.key);
                        failures.push(ObjectFailure {
                            key: p.key.clone(),
                            error: SyncError::transport(message.clone()),
                        });
                    }
                    return;
                }
            }
        };

        for (p, outcome) in prepared.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => {
                    if let Err(error) = self.apply_save_outcome(p, &outcome) {
                        failures.push(ObjectFailure {
                            key: p.key.clone(),
                            error,
                        });
                    }
                }
                Err(error) => {
                    self.fold_back(&p.key);
                    failures.push(ObjectFailure {
                        key: p.key.clone(),
                        error,
                    });
                }
            }
        }
    }

    // ---- fetch / destroy ------------------------------------------------

    /// Fetches an object's current server state and commits it.
    pub fn fetch(&self, object: &RemoraObject) -> SyncResult<()> {
        let identity = object.identity();
        let object_id = identity
            .object_id()
            .ok_or_else(|| StateError::MissingObjectId {
                class_name: identity.class_name.clone(),
            })?
            .to_string();

        let raw = self
            .transport
            .fetch_object(&identity.class_name, &object_id)?;
        let map = raw
            .as_object()
            .ok_or_else(|| SyncError::transport("fetch response is not an object"))?;

        let key = object.slot_key();
        let mut changes: BTreeMap<String, Option<Value>> = BTreeMap::new();
        for (attr, value) in map {
            if attr == "objectId" || attr == "__type" || attr == "className" {
                continue;
            }
            changes.insert(attr.clone(), Some(Self::decode_server_attribute(attr, value)?));
        }
        self.arena.commit_server_changes(&key, changes)?;
        self.datastore.update_from_server(&self.server_view(object))?;
        Ok(())
    }

    /// Destroys an object remotely, evicting its state and dropping it
    /// from every pin set.
    pub fn destroy(&self, object: &RemoraObject) -> SyncResult<()> {
        let identity = object.identity();
        let object_id = identity
            .object_id()
            .ok_or_else(|| StateError::MissingObjectId {
                class_name: identity.class_name.clone(),
            })?
            .to_string();
        let key = object.slot_key();

        self.queue.enqueue(&key, || {
            self.transport
                .destroy_object(&identity.class_name, &object_id)
        })?;

        self.datastore.destroy(&key)?;
        self.arena.remove_state(&key);
        Ok(())
    }

    /// Destroys a set of objects, collecting per-member failures while
    /// unaffected members still complete.
    pub fn destroy_all(&self, objects: &[RemoraObject]) -> SyncResult<()> {
        let mut failures = Vec::new();
        for object in objects {
            if let Err(error) = self.destroy(object) {
                failures.push(ObjectFailure {
                    key: object.slot_key(),
                    error,
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Aggregate { failures })
        }
    }

    // ---- offline cache --------------------------------------------------

    /// Pins an object's current state (and nested objects) into a pin
    /// set.
    pub fn pin(&self, object: &RemoraObject, pin_name: Option<&str>) -> SyncResult<()> {
        let data = object.to_data()?;
        self.datastore.pin(&object.slot_key(), &data, pin_name)?;
        Ok(())
    }

    /// Removes an object from one pin set.
    pub fn unpin(&self, object: &RemoraObject, pin_name: Option<&str>) -> SyncResult<()> {
        self.datastore.unpin(&object.slot_key(), pin_name)?;
        Ok(())
    }

    // ---- queries --------------------------------------------------------

    /// Runs a query offline, returning raw decoded records.
    pub fn find_data(&self, query: &QueryDescription) -> SyncResult<Vec<ObjectData>> {
        Ok(self.evaluator.find(query)?)
    }

    /// Runs a query offline, returning proxies registered through the
    /// class registry.
    pub fn find(&self, query: &QueryDescription) -> SyncResult<Vec<RemoraObject>> {
        self.evaluator
            .find(query)?
            .iter()
            .map(|data| {
                self.registry
                    .decode(Arc::clone(&self.arena), data)
                    .map_err(SyncError::from)
            })
            .collect()
    }

    /// First offline match, in query order.
    pub fn first(&self, query: &QueryDescription) -> SyncResult<Option<RemoraObject>> {
        match self.evaluator.first(query)? {
            Some(data) => Ok(Some(self.registry.decode(Arc::clone(&self.arena), &data)?)),
            None => Ok(None),
        }
    }

    /// Number of offline matches (skip ignored).
    pub fn count(&self, query: &QueryDescription) -> SyncResult<usize> {
        Ok(self.evaluator.count(query)?)
    }

    /// Offline lookup by object id within the query's source.
    pub fn get(
        &self,
        query: &QueryDescription,
        object_id: &str,
    ) -> SyncResult<Option<RemoraObject>> {
        match self.evaluator.get(query, object_id)? {
            Some(data) => Ok(Some(self.registry.decode(Arc::clone(&self.arena), &data)?)),
            None => Ok(None),
        }
    }

    /// Streams offline matches in ascending id order; rejects queries
    /// with sort, skip, or limit.
    pub fn each(
        &self,
        query: &QueryDescription,
        mut callback: impl FnMut(ObjectData) -> SyncResult<()>,
    ) -> SyncResult<usize> {
        let mut failure: Option<SyncError> = None;
        let seen = self.evaluator.each(query, |data| {
            if failure.is_some() {
                return Ok(());
            }
            if let Err(error) = callback(data) {
                failure = Some(error);
            }
            Ok(())
        })?;
        match failure {
            Some(error) => Err(error),
            None => Ok(seen),
        }
    }

    /// Runs a query against the remote engine, committing results into
    /// the arena and refreshing any matching datastore records.
    pub fn query_remote(&self, query: &QueryDescription) -> SyncResult<Vec<RemoraObject>> {
        let wire = json!({
            "where": query.where_clause,
            "limit": query.limit,
            "skip": query.skip,
        });
        let raw_results = self.transport.run_query(&query.class_name, &wire)?;

        let mut objects = Vec::new();
        for raw in raw_results {
            let map = raw
                .as_object()
                .ok_or_else(|| SyncError::transport("query result is not an object"))?;
            let object_id = map
                .get("objectId")
                .and_then(|i| i.as_str())
                .ok_or_else(|| SyncError::transport("query result missing objectId"))?;

            let mut data = ObjectData::new(query.class_name.clone());
            data.object_id = Some(object_id.to_string());
            for (attr, value) in map {
                if attr == "objectId" || attr == "__type" || attr == "className" {
                    continue;
                }
                data.attributes
                    .insert(attr.clone(), Self::decode_server_attribute(attr, value)?);
            }

            let object = self.registry.decode(Arc::clone(&self.arena), &data)?;
            self.datastore.update_from_server(&self.server_view(&object))?;
            objects.push(object);
        }
        Ok(objects)
    }
}
