// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! In-memory table gateway
//!
//! Tables are vectors of JSON-object rows with an auto-increment integer
//! primary key. Good enough for local runs and tests; it makes no attempt at
//! durability.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Changes, Filter, GatewayError, Page, Row, Sort, TableGateway, PRIMARY_KEY};

#[derive(Debug, Default)]
struct MemoryTable {
    next_id: i64,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn insert(&mut self, table: &str, mut row: Row) -> Result<Value, GatewayError> {
        let id = match row.get(PRIMARY_KEY).and_then(Value::as_i64) {
            Some(id) => {
                let taken = self
                    .rows
                    .iter()
                    .any(|r| r.get(PRIMARY_KEY).and_then(Value::as_i64) == Some(id));
                if taken {
                    return Err(GatewayError::storage(format!(
                        "UNIQUE constraint failed: {}.{}",
                        table, PRIMARY_KEY
                    )));
                }
                id
            }
            None => self.next_id.checked_add(1).ok_or_else(|| {
                GatewayError::storage(format!("{}: primary key space exhausted", table))
            })?,
        };

        self.next_id = self.next_id.max(id);
        row.insert(PRIMARY_KEY.to_string(), Value::from(id));
        self.rows.push(row);

        Ok(Value::from(id))
    }
}

/// Process-local [`TableGateway`]
#[derive(Debug, Default)]
pub struct MemoryGateway {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryGateway {
    /// Create a gateway with no tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gateway with the given empty tables
    pub fn with_tables<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateway = Self::new();
        for name in names {
            gateway.create_table(name);
        }
        gateway
    }

    /// Build a gateway from a seed document: `{ "<table>": [ {row}, ... ] }`
    pub fn from_seed(seed: &Value) -> Result<Self, GatewayError> {
        let tables = seed
            .as_object()
            .ok_or_else(|| GatewayError::storage("seed must be an object of tables"))?;

        let gateway = Self::new();
        {
            let mut guard = gateway.tables.write();
            for (name, rows) in tables {
                let rows = rows.as_array().ok_or_else(|| {
                    GatewayError::storage(format!("seed table '{}' must be an array of rows", name))
                })?;

                let table = guard.entry(name.clone()).or_default();
                for row in rows {
                    let row = row.as_object().cloned().ok_or_else(|| {
                        GatewayError::storage(format!("seed table '{}' contains a non-object row", name))
                    })?;
                    table.insert(name, row)?;
                }
            }
        }

        Ok(gateway)
    }

    /// Create an empty table; existing tables are left untouched
    pub fn create_table(&self, name: impl Into<String>) {
        self.tables.write().entry(name.into()).or_default();
    }

    /// Snapshot of a table's rows, in insertion order
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.read().get(table).map(|t| t.rows.clone())
    }

    /// Names of all tables, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn unknown(table: &str) -> GatewayError {
    GatewayError::UnknownTable {
        table: table.to_string(),
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() || columns.iter().any(|c| c == "*") {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl TableGateway for MemoryGateway {
    async fn insert(&self, table: &str, row: Row) -> Result<Value, GatewayError> {
        let mut tables = self.tables.write();
        let target = tables.get_mut(table).ok_or_else(|| unknown(table))?;
        target.insert(table, row)
    }

    async fn update(&self, table: &str, filter: &Filter, changes: Changes) -> Result<u64, GatewayError> {
        let mut tables = self.tables.write();
        let target = tables.get_mut(table).ok_or_else(|| unknown(table))?;

        // Evaluate everything first so a failing assignment leaves the table untouched
        let mut pending = Vec::new();
        for (position, existing) in target.rows.iter().enumerate() {
            if !filter.matches(existing) {
                continue;
            }
            let values = changes
                .iter()
                .filter(|(column, _)| column.as_str() != PRIMARY_KEY)
                .map(|(column, assignment)| Ok((column.clone(), assignment.evaluate(existing)?)))
                .collect::<Result<Vec<_>, GatewayError>>()?;
            pending.push((position, values));
        }

        let affected = pending.len() as u64;
        for (position, values) in pending {
            target.rows[position].extend(values);
        }

        Ok(affected)
    }

    async fn fetch(
        &self,
        table: &str,
        filter: &Filter,
        columns: &[String],
        sort: Option<&Sort>,
        page: Page,
    ) -> Result<Vec<Row>, GatewayError> {
        let tables = self.tables.read();
        let source = tables.get(table).ok_or_else(|| unknown(table))?;

        let mut matched: Vec<&Row> = source.rows.iter().filter(|r| filter.matches(r)).collect();
        if let Some(sort) = sort {
            matched.sort_by(|a, b| sort.compare(a, b));
        }

        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let limit = page
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| project(r, columns))
            .collect())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, GatewayError> {
        let mut tables = self.tables.write();
        let target = tables.get_mut(table).ok_or_else(|| unknown(table))?;

        let before = target.rows.len();
        target.rows.retain(|r| !filter.matches(r));
        Ok((before - target.rows.len()) as u64)
    }
}
