// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Field resolvers and error normalisation

use super::error::FieldError;
use crate::batch::BatchKey;
use crate::plan::Selection;
use crate::result::ResponsePath;
use crate::scheduler::TaskId;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a resolver produced for a field
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The value is available now
    Value(Value),
    /// The value comes from a batch loader; completion resumes once it is fetched
    Load(BatchKey),
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

/// Everything a resolver can see while resolving one field
pub struct FieldContext<'a> {
    selection: &'a Selection,
    parent: &'a Value,
    path: &'a ResponsePath,
    root_value: &'a Value,
    variables: &'a Map<String, Value>,
    context_data: Option<&'a (dyn Any + Send + Sync)>,
    cancel: &'a CancellationToken,
}

impl<'a> FieldContext<'a> {
    pub(crate) fn new(
        selection: &'a Selection,
        parent: &'a Value,
        path: &'a ResponsePath,
        root_value: &'a Value,
        variables: &'a Map<String, Value>,
        context_data: Option<&'a (dyn Any + Send + Sync)>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            selection,
            parent,
            path,
            root_value,
            variables,
            context_data,
            cancel,
        }
    }

    pub fn selection(&self) -> &Selection {
        self.selection
    }

    pub fn field_name(&self) -> &str {
        self.selection.field_name()
    }

    /// The value the field is resolved against
    pub fn parent(&self) -> &Value {
        self.parent
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.selection.arguments().get(name)
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        self.selection.arguments()
    }

    pub fn path(&self) -> &ResponsePath {
        self.path
    }

    pub fn root_value(&self) -> &Value {
        self.root_value
    }

    pub fn variables(&self) -> &Map<String, Value> {
        self.variables
    }

    /// Request-scoped services, looked up by type
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context_data.and_then(|data| data.downcast_ref::<T>())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Resolves one field against its parent value
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: &FieldContext<'_>) -> Result<Resolved, FieldError>;
}

/// Adapter turning a synchronous closure into a resolver
pub struct FnResolver<F> {
    f: F,
}

impl<F> FnResolver<F>
where
    F: Fn(&FieldContext<'_>) -> Result<Resolved, FieldError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn Resolver> {
        Arc::new(Self::new(f))
    }
}

impl<F> fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnResolver")
    }
}

#[async_trait]
impl<F> Resolver for FnResolver<F>
where
    F: Fn(&FieldContext<'_>) -> Result<Resolved, FieldError> + Send + Sync + 'static,
{
    async fn resolve(&self, ctx: &FieldContext<'_>) -> Result<Resolved, FieldError> {
        (self.f)(ctx)
    }
}

/// Read the field from the parent object; absent properties are null
pub(crate) fn default_resolve(selection: &Selection, parent: &Value) -> Value {
    parent
        .get(selection.field_name())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Normalises field errors before they are attached to the response
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, task: TaskId, error: FieldError) -> FieldError;
}

/// Logs the error and passes it through unchanged
#[derive(Debug, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, task: TaskId, error: FieldError) -> FieldError {
        log::debug!("Field error in {}: {}", task, error);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::LeafType;
    use serde_json::json;

    struct Tenant(&'static str);

    #[tokio::test]
    async fn test_fn_resolver_sees_arguments_and_data() {
        let selection = Selection::leaf("greeting", LeafType::String).argument("name", json!("Ada"));
        let resolver = FnResolver::new(|ctx: &FieldContext<'_>| {
            let name = ctx.argument("name").and_then(Value::as_str).unwrap_or("?");
            let tenant = ctx.data::<Tenant>().map(|t| t.0).unwrap_or("none");
            Ok(Resolved::Value(json!(format!("{}@{}", name, tenant))))
        });

        let tenant = Tenant("acme");
        let path = ResponsePath::root().with_field("greeting");
        let variables = Map::new();
        let cancel = CancellationToken::new();
        let ctx = FieldContext::new(
            &selection,
            &Value::Null,
            &path,
            &Value::Null,
            &variables,
            Some(&tenant),
            &cancel,
        );

        assert_eq!(resolver.resolve(&ctx).await, Ok(Resolved::Value(json!("Ada@acme"))));
    }

    #[test]
    fn test_default_resolve_reads_property() {
        let selection = Selection::leaf("name", LeafType::String);
        assert_eq!(default_resolve(&selection, &json!({"name": "x"})), json!("x"));
        assert_eq!(default_resolve(&selection, &json!({})), Value::Null);
    }
}
