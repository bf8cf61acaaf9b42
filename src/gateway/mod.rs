// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Table gateway
//!
//! The storage abstraction that pipeline steps are dispatched to. The engine
//! only ever talks to a [`TableGateway`]; how rows are actually stored is up
//! to the implementation. [`MemoryGateway`] keeps tables in process memory and
//! backs the server binary, the `run` command and the tests.

mod assignment;
mod filter;
mod memory;

pub use assignment::{set_columns, Arithmetic, Assignment, Changes};
pub use filter::{Condition, Filter, FilterParseError, Operator, Page, Sort};
pub use memory::MemoryGateway;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A single table row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Name of the primary key column every table carries.
pub const PRIMARY_KEY: &str = "id";

/// Errors reported by a [`TableGateway`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("table '{table}' does not exist")]
    UnknownTable { table: String },

    #[error("{message}")]
    Storage { message: String },
}

impl GatewayError {
    /// Create an opaque storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// Primitive per-table operations the pipeline executor calls into
#[async_trait]
pub trait TableGateway: Send + Sync {
    /// Insert one row and return its primary key
    async fn insert(&self, table: &str, row: Row) -> Result<Value, GatewayError>;

    /// Apply `changes` to every row matching `filter`, returning the affected
    /// count. Relative assignments read the row as it was before this call.
    async fn update(&self, table: &str, filter: &Filter, changes: Changes) -> Result<u64, GatewayError>;

    /// Fetch matching rows, projected onto `columns` (`*` selects everything)
    async fn fetch(
        &self,
        table: &str,
        filter: &Filter,
        columns: &[String],
        sort: Option<&Sort>,
        page: Page,
    ) -> Result<Vec<Row>, GatewayError>;

    /// Delete every row matching `filter`, returning the affected count
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, GatewayError>;
}
