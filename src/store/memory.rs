// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{matches_search, DefinitionStore};
use crate::errors::CrudflowResult;
use crate::pipeline::FunctionDefinition;

/// Process-local definition store
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: RwLock<BTreeMap<String, FunctionDefinition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for MemoryStore {
    async fn load(&self, name: &str) -> CrudflowResult<Option<FunctionDefinition>> {
        Ok(self.definitions.read().get(name).cloned())
    }

    async fn save(&self, definition: &FunctionDefinition) -> CrudflowResult<()> {
        self.definitions
            .write()
            .insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> CrudflowResult<bool> {
        Ok(self.definitions.write().remove(name).is_some())
    }

    async fn list(&self, search: Option<&str>) -> CrudflowResult<Vec<String>> {
        Ok(self
            .definitions
            .read()
            .keys()
            .filter(|name| matches_search(name, search))
            .cloned()
            .collect())
    }
}
