//! REST transport abstraction for the save boundary.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One object's save payload, addressed by class and (if persisted) id.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveCommand {
    /// Class of the object being saved.
    pub class_name: String,
    /// Server id for updates; `None` for creates.
    pub object_id: Option<String>,
    /// Wire JSON body: attribute name to value or `{"__op": ...}` form.
    pub body: serde_json::Value,
}

/// The server's answer to one save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOutcome {
    /// Assigned id (creates) or echoed id (updates).
    pub object_id: Option<String>,
    /// Server-echoed attributes: computed fields, applied counters, and
    /// anything else the server decided to return.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A REST transport handles network communication with the document
/// server.
///
/// This trait abstracts the HTTP layer, allowing for different
/// implementations (real HTTP, the in-process loopback, a scripted mock
/// for testing). All in-memory reconciliation lives above this seam;
/// authentication, retries, and timeouts live below it.
pub trait RestTransport: Send + Sync {
    /// Saves one object.
    fn save_object(&self, command: &SaveCommand) -> SyncResult<SaveOutcome>;

    /// Saves up to a batch of objects in one round trip, returning one
    /// outcome per command, in order. A member may fail without failing
    /// the batch.
    fn save_batch(&self, commands: &[SaveCommand]) -> SyncResult<Vec<SyncResult<SaveOutcome>>> {
        commands
            .iter()
            .map(|command| Ok(self.save_object(command)))
            .collect()
    }

    /// Fetches one object's current wire JSON.
    fn fetch_object(&self, class_name: &str, object_id: &str) -> SyncResult<serde_json::Value>;

    /// Deletes one object.
    fn destroy_object(&self, class_name: &str, object_id: &str) -> SyncResult<()>;

    /// Runs a query remotely, returning wire JSON results.
    fn run_query(
        &self,
        class_name: &str,
        query: &serde_json::Value,
    ) -> SyncResult<Vec<serde_json::Value>>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool {
        true
    }
}

/// A scripted transport for testing failure paths.
///
/// Responses are queued per operation; when a queue is empty, saves
/// succeed with an auto-assigned id and empty echo, fetches and queries
/// fail, and destroys succeed. Every command is recorded for assertions.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    next_id: AtomicU64,
    save_responses: Mutex<VecDeque<SyncResult<SaveOutcome>>>,
    fetch_responses: Mutex<VecDeque<SyncResult<serde_json::Value>>>,
    destroy_responses: Mutex<VecDeque<SyncResult<()>>>,
    query_responses: Mutex<VecDeque<SyncResult<Vec<serde_json::Value>>>>,
    saves: Mutex<Vec<SaveCommand>>,
    destroys: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    /// Creates a connected mock.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues the next save response.
    pub fn push_save_response(&self, response: SyncResult<SaveOutcome>) {
        self.save_responses.lock().push_back(response);
    }

    /// Queues the next fetch response.
    pub fn push_fetch_response(&self, response: SyncResult<serde_json::Value>) {
        self.fetch_responses.lock().push_back(response);
    }

    /// Queues the next destroy response.
    pub fn push_destroy_response(&self, response: SyncResult<()>) {
        self.destroy_responses.lock().push_back(response);
    }

    /// Queues the next query response.
    pub fn push_query_response(&self, response: SyncResult<Vec<serde_json::Value>>) {
        self.query_responses.lock().push_back(response);
    }

    /// Every save command seen, in order.
    pub fn saves(&self) -> Vec<SaveCommand> {
        self.saves.lock().clone()
    }

    /// Every destroy seen, as `(class, id)` pairs.
    pub fn destroys(&self) -> Vec<(String, String)> {
        self.destroys.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl RestTransport for MockTransport {
    fn save_object(&self, command: &SaveCommand) -> SyncResult<SaveOutcome> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.saves.lock().push(command.clone());

        if let Some(response) = self.save_responses.lock().pop_front() {
            return response;
        }
        let object_id = command.object_id.clone().unwrap_or_else(|| {
            format!("mock{}", self.next_id.fetch_add(1, Ordering::SeqCst))
        });
        Ok(SaveOutcome {
            object_id: Some(object_id),
            attributes: serde_json::Map::new(),
        })
    }

    fn fetch_object(&self, _class_name: &str, object_id: &str) -> SyncResult<serde_json::Value> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.fetch_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport(format!("no mock fetch for {object_id}"))))
    }

    fn destroy_object(&self, class_name: &str, object_id: &str) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.destroys
            .lock()
            .push((class_name.to_string(), object_id.to_string()));
        self.destroy_responses
            .lock()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn run_query(
        &self,
        class_name: &str,
        _query: &serde_json::Value,
    ) -> SyncResult<Vec<serde_json::Value>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.query_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport(format!("no mock query for {class_name}"))))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
