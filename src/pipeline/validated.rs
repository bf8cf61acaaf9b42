// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Validated, immutable pipelines
//!
//! Produced once by [`StepResolver`](super::StepResolver) and shared behind an
//! `Arc` afterwards. Steps are stored in execution order and step references
//! point straight at the producing step's position, so nothing is looked up by
//! name while a pipeline runs.

use super::definition::step_label;
use super::{Action, FunctionDefinition, TypeHint};
use crate::gateway::{Operator, Sort};

/// A resolved value source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Literal { raw: String, hint: TypeHint },
    Caller,
    User,
    /// Primary key of the single-row insert at `position`
    StepResult { position: usize, step: String },
}

/// A filter predicate with its value source resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundFilter {
    pub column: String,
    pub op: Operator,
    pub value: Binding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStep {
    pub idx: u32,
    pub name: Option<String>,
    pub table: String,
    pub action: Action,
    pub multiple: bool,
    pub columns: Vec<String>,
    /// Column bindings, ordered by column name
    pub values: Vec<(String, Binding)>,
    pub filters: Vec<BoundFilter>,
    pub order: Option<Sort>,
    pub limit: Option<u64>,
}

impl ValidatedStep {
    /// The step name, or `step_<idx>` for unnamed steps
    pub fn label(&self) -> String {
        step_label(self.idx, self.name.as_deref())
    }

    /// Whether this step reads an array of input rows
    pub fn takes_many_rows(&self) -> bool {
        self.multiple && matches!(self.action, Action::Insert | Action::Update)
    }

    /// Whether this step's primary key is kept for later steps
    pub fn publishes_key(&self) -> bool {
        self.action == Action::Insert && !self.multiple && self.name.is_some()
    }

    /// Positions of the steps this one reads results from
    pub fn referenced_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = self
            .values
            .iter()
            .filter_map(|(_, binding)| match binding {
                Binding::StepResult { position, .. } => Some(*position),
                _ => None,
            })
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPipeline {
    name: String,
    steps: Vec<ValidatedStep>,
    definition: FunctionDefinition,
    fingerprint: String,
}

impl ValidatedPipeline {
    pub(crate) fn new(
        name: String,
        steps: Vec<ValidatedStep>,
        definition: FunctionDefinition,
        fingerprint: String,
    ) -> Self {
        Self {
            name,
            steps,
            definition,
            fingerprint,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in execution (`idx`) order
    pub fn steps(&self) -> &[ValidatedStep] {
        &self.steps
    }

    /// The definition this pipeline was built from, steps sorted by `idx`
    pub fn definition(&self) -> &FunctionDefinition {
        &self.definition
    }

    /// blake3 hash of the canonical definition
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
