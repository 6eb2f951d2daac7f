//! In-process loopback transport.
//!
//! A miniature document server: it applies save payloads (including
//! `__op` mutations) to an in-memory table, assigns ids, stamps
//! timestamps, and echoes the stored representation back — enough to
//! exercise the full reconciliation path without a network.

use crate::error::{SyncError, SyncResult};
use crate::transport::{RestTransport, SaveCommand, SaveOutcome};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// A transport backed by an in-memory object table.
#[derive(Default)]
pub struct LoopbackTransport {
    objects: Mutex<HashMap<String, Map<String, serde_json::Value>>>,
    next_id: AtomicU64,
}

impl LoopbackTransport {
    /// Creates an empty loopback server.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> String {
        format!("srv{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn table_key(class_name: &str, object_id: &str) -> String {
        format!("{class_name}_{object_id}")
    }

    /// The stored representation of one object, for test assertions.
    pub fn stored(&self, class_name: &str, object_id: &str) -> Option<serde_json::Value> {
        self.objects
            .lock()
            .get(&Self::table_key(class_name, object_id))
            .map(|attrs| serde_json::Value::Object(attrs.clone()))
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn apply_field(
        stored: &mut Map<String, serde_json::Value>,
        attr: &str,
        payload: &serde_json::Value,
    ) -> SyncResult<()> {
        let op_tag = payload
            .as_object()
            .and_then(|map| map.get("__op"))
            .and_then(|t| t.as_str());

        match op_tag {
            None => {
                stored.insert(attr.to_string(), payload.clone());
            }
            Some("Delete") => {
                stored.remove(attr);
            }
            Some("Increment") => {
                let amount = payload
                    .get("amount")
                    .and_then(|a| a.as_f64())
                    .ok_or_else(|| SyncError::transport("Increment missing amount"))?;
                let current = match stored.get(attr) {
                    None | Some(serde_json::Value::Null) => 0.0,
                    Some(value) => value.as_f64().ok_or_else(|| {
                        SyncError::transport(format!("cannot increment non-numeric field {attr}"))
                    })?,
                };
                let total = current + amount;
                let encoded = if total.fract() == 0.0 {
                    json!(total as i64)
                } else {
                    json!(total)
                };
                stored.insert(attr.to_string(), encoded);
            }
            Some("Add") | Some("AddUnique") | Some("Remove") => {
                let objects = payload
                    .get("objects")
                    .and_then(|o| o.as_array())
                    .ok_or_else(|| SyncError::transport("array op missing objects"))?;
                let mut current = match stored.get(attr) {
                    Some(serde_json::Value::Array(items)) => items.clone(),
                    None | Some(serde_json::Value::Null) => Vec::new(),
                    Some(_) => {
                        return Err(SyncError::transport(format!(
                            "cannot apply array op to non-array field {attr}"
                        )))
                    }
                };
                match op_tag {
                    Some("Add") => current.extend(objects.iter().cloned()),
                    Some("AddUnique") => {
                        for item in objects {
                            if !current.contains(item) {
                                current.push(item.clone());
                            }
                        }
                    }
                    _ => current.retain(|existing| !objects.contains(existing)),
                }
                stored.insert(attr.to_string(), serde_json::Value::Array(current));
            }
            Some("AddRelation") | Some("RemoveRelation") | Some("Batch") => {
                // Relation membership lives in the join table server-side;
                // the field itself only records the relation marker.
                let target = relation_target(payload);
                let mut marker = Map::new();
                marker.insert("__type".into(), json!("Relation"));
                if let Some(target) = target {
                    marker.insert("className".into(), json!(target));
                }
                stored.insert(attr.to_string(), serde_json::Value::Object(marker));
            }
            Some(other) => {
                return Err(SyncError::transport(format!("unknown op tag {other}")));
            }
        }
        Ok(())
    }
}

fn relation_target(payload: &serde_json::Value) -> Option<String> {
    if let Some(ops) = payload.get("ops").and_then(|o| o.as_array()) {
        return ops.iter().find_map(relation_target);
    }
    payload
        .get("objects")
        .and_then(|o| o.as_array())
        .and_then(|objects| objects.first())
        .and_then(|pointer| pointer.get("className"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
}

impl RestTransport for LoopbackTransport {
    fn save_object(&self, command: &SaveCommand) -> SyncResult<SaveOutcome> {
        let body = command
            .body
            .as_object()
            .ok_or_else(|| SyncError::transport("save body is not an object"))?;

        let mut objects = self.objects.lock();
        let (object_id, mut stored) = match &command.object_id {
            Some(id) => {
                let key = Self::table_key(&command.class_name, id);
                let stored = objects
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| SyncError::transport(format!("no such object {key}")))?;
                (id.clone(), stored)
            }
            None => {
                let id = self.allocate_id();
                let mut fresh = Map::new();
                fresh.insert("createdAt".into(), json!(Self::now()));
                (id, fresh)
            }
        };

        for (attr, payload) in body {
            Self::apply_field(&mut stored, attr, payload)?;
        }
        stored.insert("updatedAt".into(), json!(Self::now()));

        trace!(class = %command.class_name, id = %object_id, "loopback save");
        objects.insert(
            Self::table_key(&command.class_name, &object_id),
            stored.clone(),
        );

        Ok(SaveOutcome {
            object_id: Some(object_id),
            attributes: stored,
        })
    }

    fn fetch_object(&self, class_name: &str, object_id: &str) -> SyncResult<serde_json::Value> {
        let key = Self::table_key(class_name, object_id);
        let objects = self.objects.lock();
        let stored = objects
            .get(&key)
            .ok_or_else(|| SyncError::transport(format!("no such object {key}")))?;

        let mut body = stored.clone();
        body.insert("objectId".into(), json!(object_id));
        Ok(serde_json::Value::Object(body))
    }

    fn destroy_object(&self, class_name: &str, object_id: &str) -> SyncResult<()> {
        let key = Self::table_key(class_name, object_id);
        if self.objects.lock().remove(&key).is_none() {
            return Err(SyncError::transport(format!("no such object {key}")));
        }
        Ok(())
    }

    fn run_query(
        &self,
        class_name: &str,
        _query: &serde_json::Value,
    ) -> SyncResult<Vec<serde_json::Value>> {
        let prefix = format!("{class_name}_");
        let objects = self.objects.lock();
        let mut results = Vec::new();
        for (key, stored) in objects.iter() {
            if let Some(id) = key.strip_prefix(&prefix) {
                let mut body = stored.clone();
                body.insert("objectId".into(), json!(id));
                results.push(serde_json::Value::Object(body));
            }
        }
        Ok(results)
    }
}
