// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Compiled selections
//!
//! Selections are produced by the operation compiler and are immutable while
//! a request executes. Arguments arrive already coerced.

use crate::exec::resolver::Resolver;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How the scheduler may run a field's resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Scheduled on the parallel lane
    #[default]
    Default,
    /// Synchronous and free of side effects
    Pure,
    /// Must never overlap other serial work (mutation root fields)
    Serial,
}

/// Leaf representation a resolved value is completed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafType {
    String,
    Int,
    Float,
    Boolean,
    Id,
    /// Any JSON scalar
    Any,
}

impl LeafType {
    /// Convert a resolved value to its leaf representation
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (LeafType::Any, Value::Array(_) | Value::Object(_)) => Err(format!(
                "Scalar cannot represent composite value: {}",
                value
            )),
            (LeafType::Any, _) => Ok(value.clone()),
            (LeafType::String, Value::String(_)) => Ok(value.clone()),
            (LeafType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (LeafType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (LeafType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (LeafType::Float, Value::Number(n)) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("Float cannot represent value: {}", value)),
            (LeafType::Int, Value::Number(n)) => {
                let int = n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
                match int {
                    Some(int) if i32::try_from(int).is_ok() => Ok(Value::from(int)),
                    _ => Err(format!("Int cannot represent non 32-bit integer value: {}", value)),
                }
            }
            (LeafType::Id, Value::String(_)) => Ok(value.clone()),
            (LeafType::Id, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Ok(Value::String(n.to_string()))
            }
            _ => Err(format!("{:?} cannot represent value: {}", self, value)),
        }
    }
}

/// Output shape of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Leaf(LeafType),
    Object,
    LeafList(LeafType),
    ObjectList,
}

impl FieldType {
    pub fn is_composite(&self) -> bool {
        matches!(self, FieldType::Object | FieldType::ObjectList)
    }
}

/// One field reference within a compiled query
#[derive(Clone)]
pub struct Selection {
    response_name: Arc<str>,
    field_name: Arc<str>,
    arguments: Map<String, Value>,
    field_type: FieldType,
    nullable: bool,
    strategy: ExecutionStrategy,
    resolver: Option<Arc<dyn Resolver>>,
    selection_set: Option<Arc<SelectionSet>>,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("response_name", &self.response_name)
            .field("field_name", &self.field_name)
            .field("field_type", &self.field_type)
            .field("nullable", &self.nullable)
            .field("strategy", &self.strategy)
            .field("has_resolver", &self.resolver.is_some())
            .field("selection_set", &self.selection_set)
            .finish()
    }
}

impl Selection {
    /// Leaf field read from the parent value unless a resolver is attached
    pub fn leaf(name: &str, leaf_type: LeafType) -> Self {
        Self::new(name, FieldType::Leaf(leaf_type), None)
    }

    /// Object field with a child selection set
    pub fn object(name: &str, selection_set: SelectionSet) -> Self {
        Self::new(name, FieldType::Object, Some(Arc::new(selection_set)))
    }

    /// List of objects with a child selection set
    pub fn object_list(name: &str, selection_set: SelectionSet) -> Self {
        Self::new(name, FieldType::ObjectList, Some(Arc::new(selection_set)))
    }

    /// List of leaf values
    pub fn leaf_list(name: &str, leaf_type: LeafType) -> Self {
        Self::new(name, FieldType::LeafList(leaf_type), None)
    }

    fn new(name: &str, field_type: FieldType, selection_set: Option<Arc<SelectionSet>>) -> Self {
        Self {
            response_name: Arc::from(name),
            field_name: Arc::from(name),
            arguments: Map::new(),
            field_type,
            nullable: true,
            strategy: ExecutionStrategy::Default,
            resolver: None,
            selection_set,
        }
    }

    /// Respond under an alias instead of the field name
    pub fn alias(mut self, alias: &str) -> Self {
        self.response_name = Arc::from(alias);
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn argument(mut self, name: &str, value: Value) -> Self {
        self.arguments.insert(name.to_string(), value);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn pure(self) -> Self {
        self.with_strategy(ExecutionStrategy::Pure)
    }

    pub fn serial(self) -> Self {
        self.with_strategy(ExecutionStrategy::Serial)
    }

    pub fn response_name(&self) -> &Arc<str> {
        &self.response_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn resolver(&self) -> Option<&Arc<dyn Resolver>> {
        self.resolver.as_ref()
    }

    pub fn selection_set(&self) -> Option<&Arc<SelectionSet>> {
        self.selection_set.as_ref()
    }

    /// True when the field resolves without side effects: a plain property
    /// read or a resolver marked pure
    pub fn has_pure_resolver(&self) -> bool {
        match self.strategy {
            ExecutionStrategy::Serial => false,
            ExecutionStrategy::Pure => true,
            ExecutionStrategy::Default => self.resolver.is_none(),
        }
    }
}

/// Fragment whose delivery is postponed until after the primary response
#[derive(Debug, Clone)]
pub struct DeferredFragment {
    label: Option<String>,
    selection_set: Arc<SelectionSet>,
}

impl DeferredFragment {
    pub fn new(label: Option<&str>, selection_set: SelectionSet) -> Self {
        Self {
            label: label.map(str::to_string),
            selection_set: Arc::new(selection_set),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn selection_set(&self) -> &Arc<SelectionSet> {
        &self.selection_set
    }
}

/// Ordered selections of one composite value
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    selections: Vec<Selection>,
    variants: HashMap<String, Vec<Selection>>,
    deferred: Vec<DeferredFragment>,
}

impl SelectionSet {
    pub fn new(selections: Vec<Selection>) -> Self {
        Self {
            selections,
            variants: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    /// Selections used when the value's `__typename` is `type_name`
    pub fn with_variant(mut self, type_name: &str, selections: Vec<Selection>) -> Self {
        self.variants.insert(type_name.to_string(), selections);
        self
    }

    pub fn with_deferred(mut self, fragment: DeferredFragment) -> Self {
        self.deferred.push(fragment);
        self
    }

    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    pub fn deferred(&self) -> &[DeferredFragment] {
        &self.deferred
    }

    /// Pick the selections matching the runtime type of `value`
    pub fn selections_for(&self, value: &Value) -> &[Selection] {
        value
            .get("__typename")
            .and_then(Value::as_str)
            .and_then(|type_name| self.variants.get(type_name))
            .map(Vec::as_slice)
            .unwrap_or(&self.selections)
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leaf_coercion() {
        assert_eq!(LeafType::Int.coerce(&json!(3)), Ok(json!(3)));
        assert_eq!(LeafType::Int.coerce(&json!(3.0)), Ok(json!(3)));
        assert!(LeafType::Int.coerce(&json!(3.5)).is_err());
        assert!(LeafType::Int.coerce(&json!(4_000_000_000i64)).is_err());
        assert!(LeafType::Int.coerce(&json!("3")).is_err());
        assert_eq!(LeafType::Id.coerce(&json!(42)), Ok(json!("42")));
        assert_eq!(LeafType::String.coerce(&json!(true)), Ok(json!("true")));
        assert!(LeafType::Boolean.coerce(&json!("yes")).is_err());
        assert!(LeafType::Any.coerce(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_variant_selection() {
        let set = SelectionSet::new(vec![Selection::leaf("id", LeafType::Id)])
            .with_variant(
                "Dog",
                vec![
                    Selection::leaf("id", LeafType::Id),
                    Selection::leaf("barks", LeafType::Boolean),
                ],
            );

        assert_eq!(set.selections_for(&json!({"__typename": "Dog"})).len(), 2);
        assert_eq!(set.selections_for(&json!({"__typename": "Cat"})).len(), 1);
        assert_eq!(set.selections_for(&json!({})).len(), 1);
    }

    #[test]
    fn test_pure_resolver_indicator() {
        assert!(Selection::leaf("name", LeafType::String).has_pure_resolver());
        assert!(!Selection::leaf("name", LeafType::String)
            .serial()
            .has_pure_resolver());
    }
}
