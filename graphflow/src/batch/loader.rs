// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Batch loaders and the per-execution batch scope
//!
//! Resolvers ask for values by key instead of fetching them one by one. The
//! keys accumulate in a `BatchScope` until the scheduler quiesces, then every
//! loader is called once with all of its pending keys.

use crate::exec::error::FieldError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A key requested from a named loader
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    loader: Arc<str>,
    key: String,
}

impl BatchKey {
    pub fn new(loader: &str, key: impl Into<String>) -> Self {
        Self {
            loader: Arc::from(loader),
            key: key.into(),
        }
    }

    pub fn loader(&self) -> &str {
        &self.loader
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.loader, self.key)
    }
}

/// Loads many keys with one fetch
///
/// Keys missing from the returned map resolve to null.
#[async_trait]
pub trait BatchLoader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, keys: &[String]) -> Result<HashMap<String, Value>, FieldError>;
}

/// Loaders available to a request, keyed by name
pub type LoaderRegistry = HashMap<Arc<str>, Arc<dyn BatchLoader>>;

/// Keys accumulated for one loader
pub struct PendingBatch {
    pub loader: Arc<dyn BatchLoader>,
    pub name: Arc<str>,
    pub keys: Vec<String>,
}

impl fmt::Debug for PendingBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingBatch")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .finish()
    }
}

#[derive(Debug, Default)]
struct ScopeState {
    pending: HashMap<Arc<str>, Vec<String>>,
    queued: HashSet<BatchKey>,
    values: HashMap<BatchKey, Result<Value, FieldError>>,
}

/// Pending keys and fetched values of one execution
pub struct BatchScope {
    loaders: Arc<LoaderRegistry>,
    state: Mutex<ScopeState>,
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatchScope")
            .field("loaders", &self.loaders.keys().collect::<Vec<_>>())
            .field("pending", &state.queued.len())
            .field("values", &state.values.len())
            .finish()
    }
}

impl BatchScope {
    pub fn new(loaders: Arc<LoaderRegistry>) -> Self {
        Self {
            loaders,
            state: Mutex::new(ScopeState::default()),
        }
    }

    fn loader(&self, key: &BatchKey) -> Result<Arc<dyn BatchLoader>, FieldError> {
        self.loaders.get(key.loader()).cloned().ok_or_else(|| {
            FieldError::new(format!(
                "No batch loader registered under '{}'",
                key.loader()
            ))
        })
    }

    /// Queue a key for the next flush; known or already queued keys are ignored
    pub fn enqueue(&self, key: &BatchKey) -> Result<(), FieldError> {
        self.loader(key)?;
        let mut state = self.state.lock();
        if state.values.contains_key(key) || state.queued.contains(key) {
            return Ok(());
        }
        state.queued.insert(key.clone());
        state
            .pending
            .entry(key.loader.clone())
            .or_default()
            .push(key.key.clone());
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().queued.is_empty()
    }

    /// Hand out every pending key group, leaving the scope without pending keys
    pub fn take_pending(&self) -> Vec<PendingBatch> {
        let mut state = self.state.lock();
        state.queued.clear();
        let pending = std::mem::take(&mut state.pending);
        pending
            .into_iter()
            .filter_map(|(name, keys)| {
                self.loaders.get(&name).map(|loader| PendingBatch {
                    loader: loader.clone(),
                    name,
                    keys,
                })
            })
            .collect()
    }

    /// Run one loader call and record the outcome of each of its keys
    pub async fn fetch(&self, batch: PendingBatch) -> Vec<BatchKey> {
        log::trace!("Loading {} keys from '{}'", batch.keys.len(), batch.name);
        let outcome = batch.loader.load(&batch.keys).await;

        let mut state = self.state.lock();
        let mut resolved = Vec::with_capacity(batch.keys.len());
        for key in batch.keys {
            let value = match &outcome {
                Ok(values) => Ok(values.get(&key).cloned().unwrap_or(Value::Null)),
                Err(error) => Err(error.clone()),
            };
            let key = BatchKey {
                loader: batch.name.clone(),
                key,
            };
            state.values.insert(key.clone(), value);
            resolved.push(key);
        }
        resolved
    }

    /// Fetch a single key right away, bypassing batching
    pub async fn load_now(&self, key: &BatchKey) -> Result<Value, FieldError> {
        if let Some(value) = self.value(key) {
            return value;
        }
        let loader = self.loader(key)?;
        self.fetch(PendingBatch {
            loader,
            name: key.loader.clone(),
            keys: vec![key.key.clone()],
        })
        .await;
        self.value(key).unwrap_or(Ok(Value::Null))
    }

    pub fn value(&self, key: &BatchKey) -> Option<Result<Value, FieldError>> {
        self.state.lock().values.get(key).cloned()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.queued.clear();
        state.values.clear();
    }
}
