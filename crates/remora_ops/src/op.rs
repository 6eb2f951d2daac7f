//! Operation value types, application, and merging.

use crate::error::{OpError, OpResult};
use remora_value::{Pointer, Relation, Value};

/// A single field mutation.
///
/// Operations are immutable values. Applying one never mutates its inputs,
/// and a failed merge leaves both operands untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Overwrite the attribute with a value.
    Set(Value),
    /// Delete the attribute.
    Unset,
    /// Add a signed amount to a numeric attribute.
    Increment(f64),
    /// Append elements to an array attribute.
    Add(Vec<Value>),
    /// Append elements to an array attribute, skipping ones already present.
    AddUnique(Vec<Value>),
    /// Remove all occurrences of elements from an array attribute.
    Remove(Vec<Value>),
    /// Add/remove members of a many-to-many relation.
    Relation(RelationOp),
}

/// Pending membership changes for a relation attribute.
///
/// Ids are deduplicated, and an id never appears on both sides: adding an
/// id cancels a pending removal of the same id and vice versa. The target
/// class is fixed by the first object seen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationOp {
    /// Target class, inferred from the first member.
    pub target_class: Option<String>,
    /// Ids to add to the relation.
    pub adds: Vec<String>,
    /// Ids to remove from the relation.
    pub removes: Vec<String>,
}

impl RelationOp {
    /// Builds a relation op from pointers to add and remove.
    ///
    /// All pointers must share one class; mixing classes is an error, as is
    /// a pointer-less (unsaved) member.
    pub fn new(adds: &[Pointer], removes: &[Pointer]) -> OpResult<Self> {
        let mut op = RelationOp::default();
        for pointer in adds {
            op.check_class(&pointer.class_name)?;
            push_unique(&mut op.adds, &pointer.object_id);
        }
        for pointer in removes {
            op.check_class(&pointer.class_name)?;
            remove_id(&mut op.adds, &pointer.object_id);
            push_unique(&mut op.removes, &pointer.object_id);
        }
        Ok(op)
    }

    fn check_class(&mut self, class_name: &str) -> OpResult<()> {
        match &self.target_class {
            None => {
                self.target_class = Some(class_name.to_string());
                Ok(())
            }
            Some(expected) if expected == class_name => Ok(()),
            Some(expected) => Err(OpError::RelationClassMismatch {
                expected: expected.clone(),
                found: class_name.to_string(),
            }),
        }
    }

    /// Folds this op over an earlier relation op on the same slot.
    ///
    /// Later ops cancel earlier opposite ops on the same id: an id in
    /// `self.adds` is dropped from the earlier removes, and conversely.
    fn merge_onto(&self, previous: &RelationOp) -> OpResult<RelationOp> {
        let target_class = match (&previous.target_class, &self.target_class) {
            (Some(a), Some(b)) if a != b => {
                return Err(OpError::RelationClassMismatch {
                    expected: a.clone(),
                    found: b.clone(),
                });
            }
            (Some(a), _) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        let mut adds = previous.adds.clone();
        let mut removes = previous.removes.clone();
        for id in &self.adds {
            remove_id(&mut removes, id);
            push_unique(&mut adds, id);
        }
        for id in &self.removes {
            remove_id(&mut adds, id);
            push_unique(&mut removes, id);
        }

        Ok(RelationOp {
            target_class,
            adds,
            removes,
        })
    }

    /// True if this op neither adds nor removes anything.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn remove_id(ids: &mut Vec<String>, id: &str) {
    ids.retain(|existing| existing != id);
}

/// Short type name of a decoded value, for error messages.
fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Date(_) => "date",
        Value::Pointer(_) => "pointer",
        Value::GeoPoint(_) => "geopoint",
        Value::Relation(_) => "relation",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::NestedObject(_) => "object",
    }
}

impl Op {
    /// The kind of this operation, as used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Set(_) => "Set",
            Op::Unset => "Unset",
            Op::Increment(_) => "Increment",
            Op::Add(_) => "Add",
            Op::AddUnique(_) => "AddUnique",
            Op::Remove(_) => "Remove",
            Op::Relation(_) => "Relation",
        }
    }

    /// Builds an `AddUnique` op, deduplicating its elements up front.
    pub fn add_unique(items: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|existing| existing.same_element(&item)) {
                unique.push(item);
            }
        }
        Op::AddUnique(unique)
    }

    /// Applies this operation to an estimated prior value.
    ///
    /// `None` models an attribute the estimate does not contain. The result
    /// is the new estimate: `None` means the attribute is deleted.
    pub fn apply_to(&self, prior: Option<&Value>) -> OpResult<Option<Value>> {
        match self {
            Op::Set(value) => Ok(Some(value.clone())),
            Op::Unset => Ok(None),
            Op::Increment(amount) => match prior {
                None | Some(Value::Null) => Ok(Some(Value::Number(*amount))),
                Some(Value::Number(n)) => Ok(Some(Value::Number(n + amount))),
                Some(other) => Err(OpError::InvalidIncrementTarget {
                    found: value_type_name(other),
                }),
            },
            Op::Add(items) => {
                let mut array = prior_array(prior, "Add")?;
                array.extend(items.iter().cloned());
                Ok(Some(Value::Array(array)))
            }
            Op::AddUnique(items) => {
                let mut array = prior_array(prior, "AddUnique")?;
                for item in items {
                    if !array.iter().any(|existing| existing.same_element(item)) {
                        array.push(item.clone());
                    }
                }
                Ok(Some(Value::Array(array)))
            }
            Op::Remove(items) => {
                let mut array = prior_array(prior, "Remove")?;
                array.retain(|existing| !items.iter().any(|item| existing.same_element(item)));
                Ok(Some(Value::Array(array)))
            }
            Op::Relation(relation) => match prior {
                None | Some(Value::Null) => Ok(Some(Value::Relation(
                    match &relation.target_class {
                        Some(target) => Relation::new(target.clone()),
                        None => Relation::unknown(),
                    },
                ))),
                Some(Value::Relation(existing)) => {
                    if let (Some(a), Some(b)) = (&existing.target_class_name, &relation.target_class)
                    {
                        if a != b {
                            return Err(OpError::RelationClassMismatch {
                                expected: a.clone(),
                                found: b.clone(),
                            });
                        }
                    }
                    let target = existing
                        .target_class_name
                        .clone()
                        .or_else(|| relation.target_class.clone());
                    Ok(Some(Value::Relation(match target {
                        Some(t) => Relation::new(t),
                        None => Relation::unknown(),
                    })))
                }
                Some(other) => Err(OpError::InvalidRelationTarget {
                    found: value_type_name(other),
                }),
            },
        }
    }

    /// Merges this (newer) operation with the operation already occupying
    /// the attribute slot in the current pending layer.
    ///
    /// Returns the composed operation, or a [`OpError::MergeConflict`] when
    /// the combination is not in the merge matrix. A conflict leaves both
    /// operands untouched.
    pub fn merge_with(&self, previous: Option<&Op>) -> OpResult<Op> {
        let previous = match previous {
            None => return Ok(self.clone()),
            Some(op) => op,
        };

        match (self, previous) {
            // Set and Unset win over everything except relation mutations:
            // overwriting or deleting a relation that already has pending
            // membership changes would silently drop them.
            (Op::Set(_), Op::Relation(_)) | (Op::Unset, Op::Relation(_)) => {
                Err(OpError::merge_conflict(self.kind(), previous.kind()))
            }
            (Op::Set(value), _) => Ok(Op::Set(value.clone())),
            (Op::Unset, _) => Ok(Op::Unset),

            (Op::Increment(amount), Op::Set(prior)) => match prior {
                Value::Number(n) => Ok(Op::Set(Value::Number(n + amount))),
                other => Err(OpError::InvalidIncrementTarget {
                    found: value_type_name(other),
                }),
            },
            (Op::Increment(amount), Op::Unset) => Ok(Op::Set(Value::Number(*amount))),
            (Op::Increment(amount), Op::Increment(prior)) => Ok(Op::Increment(prior + amount)),

            (Op::Add(_), Op::Set(prior)) => Ok(Op::Set(
                self.apply_to(Some(prior))?
                    .unwrap_or_else(|| Value::Array(Vec::new())),
            )),
            (Op::Add(items), Op::Unset) => Ok(Op::Set(Value::Array(items.clone()))),
            (Op::Add(items), Op::Add(prior)) => {
                let mut merged = prior.clone();
                merged.extend(items.iter().cloned());
                Ok(Op::Add(merged))
            }

            (Op::AddUnique(_), Op::Set(prior)) => Ok(Op::Set(
                self.apply_to(Some(prior))?
                    .unwrap_or_else(|| Value::Array(Vec::new())),
            )),
            (Op::AddUnique(items), Op::Unset) => Ok(Op::Set(Value::Array(items.clone()))),
            (Op::AddUnique(items), Op::AddUnique(prior)) => {
                let mut merged = prior.clone();
                for item in items {
                    if !merged.iter().any(|existing| existing.same_element(item)) {
                        merged.push(item.clone());
                    }
                }
                Ok(Op::AddUnique(merged))
            }

            (Op::Remove(_), Op::Set(prior)) => Ok(Op::Set(
                self.apply_to(Some(prior))?
                    .unwrap_or_else(|| Value::Array(Vec::new())),
            )),
            (Op::Remove(_), Op::Unset) => Ok(Op::Unset),
            (Op::Remove(items), Op::Remove(prior)) => {
                let mut merged = prior.clone();
                for item in items {
                    if !merged.iter().any(|existing| existing.same_element(item)) {
                        merged.push(item.clone());
                    }
                }
                Ok(Op::Remove(merged))
            }

            (Op::Relation(relation), Op::Relation(prior)) => {
                Ok(Op::Relation(relation.merge_onto(prior)?))
            }

            // Everything else is off the matrix.
            _ => Err(OpError::merge_conflict(self.kind(), previous.kind())),
        }
    }
}

fn prior_array(prior: Option<&Value>, op_kind: &'static str) -> OpResult<Vec<Value>> {
    match prior {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(OpError::InvalidArrayTarget {
            op_kind,
            found: value_type_name(other),
        }),
    }
}
