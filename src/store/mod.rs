// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Function definition persistence
//!
//! A [`DefinitionStore`] keeps the authored definitions; the
//! [`DefinitionCache`] keeps their validated forms for invocation.

mod cache;
mod filesystem;
mod memory;

pub use cache::DefinitionCache;
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::errors::CrudflowResult;
use crate::pipeline::FunctionDefinition;

/// Trait for definition store implementations
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Load a definition by function name
    async fn load(&self, name: &str) -> CrudflowResult<Option<FunctionDefinition>>;

    /// Create or fully replace a definition
    async fn save(&self, definition: &FunctionDefinition) -> CrudflowResult<()>;

    /// Remove a definition, returning whether it existed
    async fn remove(&self, name: &str) -> CrudflowResult<bool>;

    /// Function names, sorted, optionally narrowed to those containing `search`
    async fn list(&self, search: Option<&str>) -> CrudflowResult<Vec<String>>;
}

/// Case-insensitive substring match used by every store's `list`
pub(crate) fn matches_search(name: &str, search: Option<&str>) -> bool {
    match search.map(str::trim) {
        None | Some("") => true,
        Some(needle) => name.to_lowercase().contains(&needle.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_matching() {
        assert!(matches_search("CreateOrder", None));
        assert!(matches_search("CreateOrder", Some("  ")));
        assert!(matches_search("CreateOrder", Some("order")));
        assert!(!matches_search("CreateOrder", Some("invoice")));
    }
}
