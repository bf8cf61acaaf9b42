// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Validated pipeline cache
//!
//! Readers clone an `Arc` out from under a read lock; writers replace the
//! whole entry. The lock is never held across an await or an execution, so a
//! running invocation keeps the pipeline it started with.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pipeline::ValidatedPipeline;

#[derive(Debug, Default)]
pub struct DefinitionCache {
    entries: RwLock<HashMap<String, Arc<ValidatedPipeline>>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ValidatedPipeline>> {
        self.entries.read().get(name).cloned()
    }

    /// Swap in a pipeline, returning the one it replaced
    pub fn insert(&self, pipeline: Arc<ValidatedPipeline>) -> Option<Arc<ValidatedPipeline>> {
        self.entries
            .write()
            .insert(pipeline.name().to_string(), pipeline)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ValidatedPipeline>> {
        self.entries.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
