//! Identity records, pin sets, and record lifecycle.

use crate::adapter::StorageAdapter;
use crate::error::{StoreError, StoreResult};
use crate::keys::{is_pin_set_key, pin_set_key};
use remora_value::{encode, strip_sensitive, ObjectData, Value};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// The offline cache: serialized object records plus pin-set membership.
///
/// Records are stored under `ClassName_id` as a one-element array holding
/// the full decoded JSON of the object (sensitive fields stripped). Pin
/// sets are ordered, duplicate-free lists of identity keys. A record
/// stays resident as long as at least one pin set references it.
pub struct LocalDatastore {
    adapter: Arc<dyn StorageAdapter>,
}

impl LocalDatastore {
    /// Creates a datastore over the given adapter.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    fn encode_record(data: &ObjectData) -> StoreResult<serde_json::Value> {
        let mut encoded = encode(&Value::NestedObject(Box::new(data.clone())))?;
        strip_sensitive(&mut encoded);
        Ok(encoded)
    }

    fn read_pin_set(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.adapter.load(key)? {
            None => Ok(Vec::new()),
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(StoreError::corrupt_record(
                        key,
                        format!("pin set entry is not a string: {other}"),
                    )),
                })
                .collect(),
            Some(other) => Err(StoreError::corrupt_record(
                key,
                format!("pin set is not an array: {other}"),
            )),
        }
    }

    fn write_pin_set(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            self.adapter.remove(key)
        } else {
            self.adapter.store(key, json!(members))
        }
    }

    /// Walks the object graph under `data`, collecting every distinct
    /// nested object. Fails before any storage mutation if an
    /// identity-less object is reachable.
    fn collect_nested<'a>(
        value: &'a Value,
        out: &mut Vec<&'a ObjectData>,
    ) -> StoreResult<()> {
        match value {
            Value::NestedObject(data) => {
                if data.object_id.is_none() {
                    return Err(StoreError::UnsavedPointer {
                        class_name: data.class_name.clone(),
                    });
                }
                out.push(data);
                for nested in data.attributes.values() {
                    Self::collect_nested(nested, out)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    Self::collect_nested(item, out)?;
                }
                Ok(())
            }
            Value::Object(map) => {
                for nested in map.values() {
                    Self::collect_nested(nested, out)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Pins an object (and, recursively, every distinct object nested in
    /// its attributes) into a pin set.
    ///
    /// Each reachable identity gets its serialized record written or
    /// overwritten, and its key appended to the pin set if absent.
    /// `root_key` names the root record — the caller supplies it so that
    /// never-saved roots can pin under their local-id key.
    pub fn pin(
        &self,
        root_key: &str,
        data: &ObjectData,
        pin_name: Option<&str>,
    ) -> StoreResult<()> {
        let mut nested = Vec::new();
        for value in data.attributes.values() {
            Self::collect_nested(value, &mut nested)?;
        }

        debug!(root = %root_key, pin = ?pin_name, nested = nested.len(), "pinning object graph");

        let mut records: Vec<(String, serde_json::Value)> =
            vec![(root_key.to_string(), Self::encode_record(data)?)];
        for data in nested {
            let key = data
                .identity_key()
                .expect("collect_nested rejects identity-less objects");
            if records.iter().any(|(existing, _)| existing == &key) {
                continue;
            }
            records.push((key, Self::encode_record(data)?));
        }

        let set_key = pin_set_key(pin_name);
        let mut members = self.read_pin_set(&set_key)?;
        for (key, encoded) in records {
            self.adapter.store(&key, json!([encoded]))?;
            if !members.contains(&key) {
                members.push(key);
            }
        }
        self.write_pin_set(&set_key, &members)
    }

    /// Removes an identity key from one pin set (the default set when
    /// unnamed). The record itself survives while any other pin set still
    /// references it; once nothing does, it is dropped.
    pub fn unpin(&self, root_key: &str, pin_name: Option<&str>) -> StoreResult<()> {
        let set_key = pin_set_key(pin_name);
        let mut members = self.read_pin_set(&set_key)?;
        members.retain(|member| member != root_key);
        self.write_pin_set(&set_key, &members)?;

        debug!(root = %root_key, pin = ?pin_name, "unpinned");
        self.drop_if_unreferenced(root_key)
    }

    fn drop_if_unreferenced(&self, key: &str) -> StoreResult<()> {
        for (_, members) in self.all_pin_sets()? {
            if members.iter().any(|member| member == key) {
                return Ok(());
            }
        }
        self.adapter.remove(key)
    }

    /// Refreshes a stored record in place after a fetch or save touched
    /// the identity. Returns `true` if a record was present and updated;
    /// identities the store does not hold are left alone.
    pub fn update_from_server(&self, data: &ObjectData) -> StoreResult<bool> {
        let key = match data.identity_key() {
            Some(key) => key,
            None => return Ok(false),
        };
        if self.adapter.load(&key)?.is_none() {
            return Ok(false);
        }
        self.adapter.store(&key, json!([Self::encode_record(data)?]))?;
        Ok(true)
    }

    /// Migrates a record from its pre-save local-id key to the key of the
    /// server id the save assigned, rewriting pin-set membership.
    pub fn update_object_id(&self, old_key: &str, data: &ObjectData) -> StoreResult<()> {
        let new_key = match data.identity_key() {
            Some(key) => key,
            None => return Ok(()),
        };
        if old_key == new_key {
            return Ok(());
        }

        if self.adapter.load(old_key)?.is_some() {
            self.adapter.remove(old_key)?;
            self.adapter
                .store(&new_key, json!([Self::encode_record(data)?]))?;
        }

        for (set_key, mut members) in self.all_pin_sets()? {
            let mut changed = false;
            for member in members.iter_mut() {
                if member == old_key {
                    *member = new_key.clone();
                    changed = true;
                }
            }
            if changed {
                members.dedup();
                self.write_pin_set(&set_key, &members)?;
            }
        }
        Ok(())
    }

    /// Removes a destroyed identity from every pin set and drops its
    /// record.
    pub fn destroy(&self, key: &str) -> StoreResult<()> {
        debug!(key = %key, "destroying cached record");
        for (set_key, mut members) in self.all_pin_sets()? {
            let before = members.len();
            members.retain(|member| member != key);
            if members.len() != before {
                self.write_pin_set(&set_key, &members)?;
            }
        }
        self.adapter.remove(key)
    }

    /// Loads the decoded record stored under an identity key.
    pub fn get_record(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        match self.adapter.load(key)? {
            None => Ok(None),
            Some(serde_json::Value::Array(mut items)) if items.len() == 1 => {
                Ok(Some(items.remove(0)))
            }
            Some(other) => Err(StoreError::corrupt_record(
                key,
                format!("record is not a one-element array: {other}"),
            )),
        }
    }

    /// Members of a pin set, in pin order.
    pub fn pin_list(&self, pin_name: Option<&str>) -> StoreResult<Vec<String>> {
        self.read_pin_set(&pin_set_key(pin_name))
    }

    /// Every pin set currently stored, keyed by storage key.
    pub fn all_pin_sets(&self) -> StoreResult<Vec<(String, Vec<String>)>> {
        let mut sets = Vec::new();
        for key in self.adapter.keys()? {
            if is_pin_set_key(&key) {
                let members = self.read_pin_set(&key)?;
                sets.push((key, members));
            }
        }
        Ok(sets)
    }

    /// Every identity key currently holding a record.
    pub fn identity_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .adapter
            .keys()?
            .into_iter()
            .filter(|key| !is_pin_set_key(key))
            .collect())
    }

    /// Identity keys of one class.
    pub fn keys_of_class(&self, class_name: &str) -> StoreResult<Vec<String>> {
        let prefix = format!("{class_name}_");
        Ok(self
            .identity_keys()?
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect())
    }

    /// Removes everything: records and pin sets.
    pub fn clear(&self) -> StoreResult<()> {
        self.adapter.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use remora_value::Pointer;

    fn datastore() -> LocalDatastore {
        LocalDatastore::new(Arc::new(MemoryAdapter::new()))
    }

    fn object(class: &str, id: &str) -> ObjectData {
        let mut data = ObjectData::new(class);
        data.object_id = Some(id.to_string());
        data
    }

    #[test]
    fn pin_writes_record_and_membership() {
        let store = datastore();
        let mut game = object("Game", "g1");
        game.attributes.insert("score".into(), Value::Number(3.0));

        store.pin("Game_g1", &game, None).unwrap();

        assert_eq!(store.pin_list(None).unwrap(), vec!["Game_g1".to_string()]);
        let record = store.get_record("Game_g1").unwrap().unwrap();
        assert_eq!(record["__type"], json!("Object"));
        assert_eq!(record["className"], json!("Game"));
        assert_eq!(record["score"], json!(3));
    }

    #[test]
    fn pin_recursively_stores_nested_objects() {
        let store = datastore();
        let mut owner = object("Player", "p1");
        owner.attributes.insert("name".into(), Value::from("kit"));
        let mut game = object("Game", "g1");
        game.attributes
            .insert("owner".into(), Value::NestedObject(Box::new(owner)));
        game.attributes.insert(
            "watchers".into(),
            Value::Array(vec![Value::NestedObject(Box::new(object("Player", "p2")))]),
        );

        store.pin("Game_g1", &game, None).unwrap();

        // Root plus two nested distinct objects.
        let mut members = store.pin_list(None).unwrap();
        members.sort();
        assert_eq!(members, vec!["Game_g1", "Player_p1", "Player_p2"]);
        assert!(store.get_record("Player_p1").unwrap().is_some());
        assert!(store.get_record("Player_p2").unwrap().is_some());
    }

    #[test]
    fn pin_with_unsaved_nested_object_fails_before_writing() {
        let store = datastore();
        let mut game = object("Game", "g1");
        game.attributes.insert(
            "owner".into(),
            Value::NestedObject(Box::new(ObjectData::new("Player"))),
        );

        let err = store.pin("Game_g1", &game, None).unwrap_err();
        assert!(matches!(err, StoreError::UnsavedPointer { .. }));
        // Nothing landed in the store.
        assert!(store.get_record("Game_g1").unwrap().is_none());
        assert!(store.pin_list(None).unwrap().is_empty());
    }

    #[test]
    fn pin_is_idempotent_on_membership() {
        let store = datastore();
        let game = object("Game", "g1");
        store.pin("Game_g1", &game, None).unwrap();
        store.pin("Game_g1", &game, None).unwrap();
        assert_eq!(store.pin_list(None).unwrap().len(), 1);
    }

    #[test]
    fn unpin_respects_remaining_references() {
        let store = datastore();
        let game = object("Game", "g1");
        store.pin("Game_g1", &game, None).unwrap();
        store.pin("Game_g1", &game, Some("favorites")).unwrap();

        store.unpin("Game_g1", Some("favorites")).unwrap();
        // Still in the default set, record survives.
        assert!(store.get_record("Game_g1").unwrap().is_some());

        store.unpin("Game_g1", None).unwrap();
        // Last reference gone, record dropped.
        assert!(store.get_record("Game_g1").unwrap().is_none());
    }

    #[test]
    fn update_from_server_refreshes_only_existing_records() {
        let store = datastore();
        let mut game = object("Game", "g1");
        game.attributes.insert("score".into(), Value::Number(1.0));
        store.pin("Game_g1", &game, None).unwrap();

        game.attributes.insert("score".into(), Value::Number(2.0));
        assert!(store.update_from_server(&game).unwrap());
        let record = store.get_record("Game_g1").unwrap().unwrap();
        assert_eq!(record["score"], json!(2));

        // An identity the store does not hold is ignored.
        let other = object("Game", "g2");
        assert!(!store.update_from_server(&other).unwrap());
        assert!(store.get_record("Game_g2").unwrap().is_none());
    }

    #[test]
    fn update_object_id_migrates_key_and_membership() {
        let store = datastore();
        let unsaved = ObjectData::new("Game");
        store.pin("Game_local_0", &unsaved, None).unwrap();

        let saved = object("Game", "srv1");
        store.update_object_id("Game_local_0", &saved).unwrap();

        assert!(store.get_record("Game_local_0").unwrap().is_none());
        assert!(store.get_record("Game_srv1").unwrap().is_some());
        assert_eq!(store.pin_list(None).unwrap(), vec!["Game_srv1".to_string()]);
    }

    #[test]
    fn destroy_removes_from_every_pin_set() {
        let store = datastore();
        let game = object("Game", "g1");
        store.pin("Game_g1", &game, None).unwrap();
        store.pin("Game_g1", &game, Some("a")).unwrap();
        store.pin("Game_g1", &game, Some("b")).unwrap();

        store.destroy("Game_g1").unwrap();

        assert!(store.get_record("Game_g1").unwrap().is_none());
        assert!(store.pin_list(None).unwrap().is_empty());
        assert!(store.pin_list(Some("a")).unwrap().is_empty());
        assert!(store.pin_list(Some("b")).unwrap().is_empty());
    }

    #[test]
    fn sensitive_fields_are_stripped_from_records() {
        let store = datastore();
        let mut user = object("_User", "u1");
        user.attributes
            .insert("password".into(), Value::from("hunter2"));
        user.attributes.insert("name".into(), Value::from("kit"));

        store.pin("_User_u1", &user, None).unwrap();

        let record = store.get_record("_User_u1").unwrap().unwrap();
        assert!(record.get("password").is_none());
        assert_eq!(record["name"], json!("kit"));
    }

    #[test]
    fn keys_of_class_filters_prefix() {
        let store = datastore();
        store.pin("Game_g1", &object("Game", "g1"), None).unwrap();
        store.pin("Game_g2", &object("Game", "g2"), None).unwrap();
        store
            .pin("Player_p1", &object("Player", "p1"), None)
            .unwrap();

        let mut keys = store.keys_of_class("Game").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["Game_g1", "Game_g2"]);
    }

    #[test]
    fn pinned_graph_roundtrip_preserves_json() {
        // Pin then read back: the record equals the pinned encoding.
        let store = datastore();
        let mut game = object("Game", "g1");
        game.attributes.insert(
            "owner".into(),
            Value::Pointer(Pointer::new("Player", "p1")),
        );
        game.attributes.insert("score".into(), Value::Number(9.0));

        store.pin("Game_g1", &game, None).unwrap();

        let record = store.get_record("Game_g1").unwrap().unwrap();
        let expected = {
            let mut encoded =
                encode(&Value::NestedObject(Box::new(game.clone()))).unwrap();
            strip_sensitive(&mut encoded);
            encoded
        };
        assert_eq!(record, expected);
    }
}
