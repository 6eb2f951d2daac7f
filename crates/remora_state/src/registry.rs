//! Class registry: class name to behavior, resolved at decode time.

use crate::arena::StateArena;
use crate::error::StateResult;
use crate::object::RemoraObject;
use parking_lot::RwLock;
use remora_value::{ObjectData, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Custom per-class behavior, attached through the registry.
///
/// The default implementations make registration purely declarative;
/// override [`ClassBehavior::validate_attribute`] to enforce class
/// invariants before a mutation reaches the pending layer.
pub trait ClassBehavior: Send + Sync {
    /// Validates an attribute write for this class.
    fn validate_attribute(&self, _attr: &str, _value: &Value) -> StateResult<()> {
        Ok(())
    }

    /// Attributes every fresh instance of this class starts with.
    fn default_attributes(&self) -> Vec<(String, Value)> {
        Vec::new()
    }
}

struct DefaultBehavior;

impl ClassBehavior for DefaultBehavior {}

/// Explicit mapping from class name to behavior.
///
/// Unregistered classes decode with default behavior; registration is
/// additive and later registrations replace earlier ones.
pub struct ClassRegistry {
    classes: RwLock<HashMap<String, Arc<dyn ClassBehavior>>>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers behavior for a class.
    pub fn register(&self, class_name: impl Into<String>, behavior: Arc<dyn ClassBehavior>) {
        self.classes.write().insert(class_name.into(), behavior);
    }

    /// Resolves the behavior for a class.
    pub fn resolve(&self, class_name: &str) -> Arc<dyn ClassBehavior> {
        self.classes
            .read()
            .get(class_name)
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultBehavior))
    }

    /// True if the class has registered behavior.
    pub fn is_registered(&self, class_name: &str) -> bool {
        self.classes.read().contains_key(class_name)
    }

    /// Decodes object data into a proxy, running the class's attribute
    /// validation over the decoded attributes first.
    pub fn decode(
        &self,
        arena: Arc<StateArena>,
        data: &ObjectData,
    ) -> StateResult<RemoraObject> {
        let behavior = self.resolve(&data.class_name);
        for (attr, value) in &data.attributes {
            behavior.validate_attribute(attr, value)?;
        }
        RemoraObject::from_data(arena, data)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
