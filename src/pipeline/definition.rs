// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Function definition structures
//!
//! The authoring model: what gets posted to `/api/function/create`, stored,
//! and written in YAML/JSON files for the CLI. Nothing here is trusted until
//! it has been through [`StepResolver`](crate::pipeline::StepResolver).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::TypeHint;
use crate::errors::CrudflowError;
use crate::gateway::Operator;

/// A named, ordered set of steps exposed as one callable endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name, also the invocation path segment
    pub name: String,

    /// Steps; execution order comes from each step's `idx`
    #[serde(rename = "functions", alias = "steps")]
    pub steps: Vec<FunctionStep>,
}

impl FunctionDefinition {
    /// Load a definition from a YAML or JSON file
    pub fn from_file(path: &Path) -> Result<Self, CrudflowError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CrudflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, CrudflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse a definition from JSON
    pub fn from_json(json: &str) -> Result<Self, CrudflowError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, CrudflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a step by name
    pub fn get_step(&self, name: &str) -> Option<&FunctionStep> {
        self.steps.iter().find(|s| s.name.as_deref() == Some(name))
    }
}

/// One CRUD action within a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionStep {
    /// Execution and reference order
    pub idx: u32,

    /// Optional name, unique within the pipeline when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Target table
    pub table: String,

    pub action: Action,

    /// Insert/update only: accept 0..N input rows instead of exactly one
    #[serde(default)]
    pub multiple: bool,

    /// Fetch projection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    /// Insert/update column bindings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, ValueBinding>,

    /// Fetch/delete (and optionally update) predicates, AND-ed together
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterPredicate>,

    /// Fetch only: sort expression, e.g. `-created_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,

    /// Fetch only: maximum number of rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl FunctionStep {
    /// Display label: the step name, or `step_<idx>` for unnamed steps
    pub fn label(&self) -> String {
        step_label(self.idx, self.name.as_deref())
    }
}

pub(crate) fn step_label(idx: u32, name: Option<&str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None => format!("step_{}", idx),
    }
}

/// Step actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Fetch,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Fetch => write!(f, "fetch"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Where a column's value comes from at call time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ValueBinding {
    /// Fixed value written into the definition
    Literal {
        #[serde(deserialize_with = "raw_literal")]
        value: String,
        #[serde(default, rename = "type")]
        hint: TypeHint,
    },

    /// Taken from the caller's payload under the column name
    Caller,

    /// The authenticated caller's id
    User,

    /// Primary key produced by an earlier single-row insert
    Step { step: String },
}

impl ValueBinding {
    pub fn literal(value: impl Into<String>, hint: TypeHint) -> Self {
        Self::Literal {
            value: value.into(),
            hint,
        }
    }

    pub fn step(step: impl Into<String>) -> Self {
        Self::Step { step: step.into() }
    }
}

/// A filter value: like [`ValueBinding`] minus step references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum FilterValue {
    Literal {
        #[serde(deserialize_with = "raw_literal")]
        value: String,
        #[serde(default, rename = "type")]
        hint: TypeHint,
    },
    Caller,
    User,
}

/// `column OP value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    pub op: Operator,
    pub value: FilterValue,
}

impl FilterPredicate {
    pub fn new(column: impl Into<String>, op: Operator, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

/// Accept literals written as strings, numbers or booleans
fn raw_literal<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
        Raw::Bool(b) => b.to_string(),
    })
}
