// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Pipeline validation
//!
//! Turns a raw [`FunctionDefinition`] into a [`ValidatedPipeline`], or says
//! why it cannot. Runs once per create/update; a pipeline that fails here is
//! never stored and never executed.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::validated::{Binding, BoundFilter, ValidatedPipeline, ValidatedStep};
use super::{Action, FilterValue, FunctionDefinition, FunctionStep, ValueBinding};
use crate::gateway::Sort;

/// Longest accepted function or step name
pub const MAX_NAME_LEN: usize = 64;

/// Response key reserved for the status message
const RESERVED_NAME: &str = "message";

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("name pattern is valid"));

/// Labels given to unnamed steps
static GENERATED_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^step_[0-9]+$").expect("label pattern is valid"));

static COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("column pattern is valid"));

/// Why a definition was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'{name}' is not a valid name (letters, digits, '_' or '-', starting with a letter or '_', at most {MAX_NAME_LEN} characters, not '{RESERVED_NAME}' or 'step_<number>')")]
    InvalidName { name: String },

    #[error("function '{name}' has no steps")]
    EmptyPipeline { name: String },

    #[error("step name '{name}' is used more than once")]
    DuplicateStepName { name: String },

    #[error("step index {idx} is used more than once")]
    NonMonotonicIndex { idx: u32 },

    #[error("step '{step}' references '{reference}', which does not run before it")]
    ForwardOrSelfReference { step: String, reference: String },

    #[error("step '{step}' references unknown step '{reference}'")]
    MissingReferencedStep { step: String, reference: String },

    #[error("step '{step}' ({action}): {reason}")]
    InvalidActionFields {
        step: String,
        action: Action,
        reason: String,
    },
}

impl ValidationError {
    /// Stable error kind for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidName { .. } => "InvalidName",
            Self::EmptyPipeline { .. } => "EmptyPipeline",
            Self::DuplicateStepName { .. } => "DuplicateStepName",
            Self::NonMonotonicIndex { .. } => "NonMonotonicIndex",
            Self::ForwardOrSelfReference { .. } => "ForwardOrSelfReference",
            Self::MissingReferencedStep { .. } => "MissingReferencedStep",
            Self::InvalidActionFields { .. } => "InvalidActionFields",
        }
    }

    fn fields(step: &FunctionStep, reason: impl Into<String>) -> Self {
        Self::InvalidActionFields {
            step: step.label(),
            action: step.action,
            reason: reason.into(),
        }
    }
}

/// Check that a function or step name is safe to use as a path segment and
/// response key
pub fn check_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_NAME_LEN
        || name == RESERVED_NAME
        || GENERATED_LABEL.is_match(name)
        || !NAME.is_match(name)
    {
        return Err(ValidationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Definition validator and linker
pub struct StepResolver;

impl StepResolver {
    /// Validate a definition.
    ///
    /// Checks run in a fixed order: names, duplicate step names, `idx`
    /// uniqueness, per-action fields, then step references. The first failure
    /// is returned, so identical input always yields the identical result.
    pub fn validate(definition: &FunctionDefinition) -> Result<ValidatedPipeline, ValidationError> {
        check_name(&definition.name)?;

        if definition.steps.is_empty() {
            return Err(ValidationError::EmptyPipeline {
                name: definition.name.clone(),
            });
        }

        Self::check_step_names(&definition.steps)?;
        let ordered = Self::order_by_idx(&definition.steps)?;

        let sorts = ordered
            .iter()
            .map(|step| Self::check_action_fields(step))
            .collect::<Result<Vec<_>, _>>()?;

        let positions: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .filter_map(|(position, step)| step.name.as_deref().map(|name| (name, position)))
            .collect();

        let steps = ordered
            .iter()
            .zip(sorts)
            .enumerate()
            .map(|(position, (step, order))| {
                Self::link_step(position, step, order, &ordered, &positions)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let canonical = FunctionDefinition {
            name: definition.name.clone(),
            steps: ordered.into_iter().cloned().collect(),
        };
        let fingerprint = fingerprint(&canonical);

        Ok(ValidatedPipeline::new(
            definition.name.clone(),
            steps,
            canonical,
            fingerprint,
        ))
    }

    /// Non-fatal observations about a definition, for authoring tools
    pub fn warnings(definition: &FunctionDefinition) -> Vec<String> {
        let mut warnings = Vec::new();

        for step in &definition.steps {
            match step.action {
                Action::Delete if step.filters.is_empty() => warnings.push(format!(
                    "Step '{}': delete without filters removes every row in '{}'",
                    step.label(),
                    step.table
                )),
                Action::Fetch if step.name.is_none() => warnings.push(format!(
                    "Step '{}': unnamed fetch, rows are returned under '{}'",
                    step.label(),
                    step.label()
                )),
                Action::Insert if !step.multiple && step.name.is_none() => {
                    if definition.steps.iter().any(|s| s.idx > step.idx) {
                        warnings.push(format!(
                            "Step '{}': unnamed insert, its key cannot be referenced by later steps",
                            step.label()
                        ));
                    }
                }
                _ => {}
            }
        }

        warnings
    }

    fn check_step_names(steps: &[FunctionStep]) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for name in steps.iter().filter_map(|s| s.name.as_deref()) {
            check_name(name)?;
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateStepName {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Sort steps by `idx`; array position carries no meaning
    fn order_by_idx(steps: &[FunctionStep]) -> Result<Vec<&FunctionStep>, ValidationError> {
        let mut ordered: Vec<&FunctionStep> = steps.iter().collect();
        ordered.sort_by_key(|s| s.idx);

        if let Some(pair) = ordered.windows(2).find(|pair| pair[0].idx == pair[1].idx) {
            return Err(ValidationError::NonMonotonicIndex { idx: pair[1].idx });
        }

        Ok(ordered)
    }

    fn check_action_fields(step: &FunctionStep) -> Result<Option<Sort>, ValidationError> {
        if step.table.trim().is_empty() {
            return Err(ValidationError::fields(step, "table is required"));
        }

        let fetch_only = step.order.is_some() || step.limit.is_some();

        match step.action {
            Action::Insert | Action::Update => {
                if step.values.is_empty() {
                    return Err(ValidationError::fields(step, "values are required"));
                }
                if !step.columns.is_empty() {
                    return Err(ValidationError::fields(step, "columns are only allowed on fetch"));
                }
                if step.action == Action::Insert && !step.filters.is_empty() {
                    return Err(ValidationError::fields(step, "filters are not allowed on insert"));
                }
            }
            Action::Fetch => {
                if step.columns.is_empty() {
                    return Err(ValidationError::fields(step, "columns are required"));
                }
                if !step.values.is_empty() {
                    return Err(ValidationError::fields(step, "values are not allowed on fetch"));
                }
            }
            Action::Delete => {
                if !step.values.is_empty() || !step.columns.is_empty() {
                    return Err(ValidationError::fields(
                        step,
                        "delete carries no values or columns",
                    ));
                }
            }
        }

        if step.multiple && matches!(step.action, Action::Fetch | Action::Delete) {
            return Err(ValidationError::fields(
                step,
                "multiple is only meaningful for insert and update",
            ));
        }

        if fetch_only && step.action != Action::Fetch {
            return Err(ValidationError::fields(
                step,
                "order and limit are only allowed on fetch",
            ));
        }

        let mut seen = HashSet::new();
        for column in &step.columns {
            if column != "*" && !COLUMN.is_match(column) {
                return Err(ValidationError::fields(
                    step,
                    format!("'{}' is not a valid column name", column),
                ));
            }
            if !seen.insert(column.as_str()) {
                return Err(ValidationError::fields(
                    step,
                    format!("column '{}' is listed twice", column),
                ));
            }
        }

        let bound_columns = step
            .values
            .keys()
            .chain(step.filters.iter().map(|f| &f.column));
        for column in bound_columns {
            if !COLUMN.is_match(column) {
                return Err(ValidationError::fields(
                    step,
                    format!("'{}' is not a valid column name", column),
                ));
            }
        }

        step.order
            .as_deref()
            .map(Sort::parse)
            .transpose()
            .map_err(|e| ValidationError::fields(step, e.to_string()))
    }

    fn link_step(
        position: usize,
        step: &FunctionStep,
        order: Option<Sort>,
        ordered: &[&FunctionStep],
        positions: &HashMap<&str, usize>,
    ) -> Result<ValidatedStep, ValidationError> {
        let values = step
            .values
            .iter()
            .map(|(column, binding)| {
                let bound = match binding {
                    ValueBinding::Literal { value, hint } => Binding::Literal {
                        raw: value.clone(),
                        hint: *hint,
                    },
                    ValueBinding::Caller => Binding::Caller,
                    ValueBinding::User => Binding::User,
                    ValueBinding::Step { step: target } => {
                        Self::link_reference(position, step, target, ordered, positions)?
                    }
                };
                Ok((column.clone(), bound))
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let filters = step
            .filters
            .iter()
            .map(|f| BoundFilter {
                column: f.column.clone(),
                op: f.op,
                value: match &f.value {
                    FilterValue::Literal { value, hint } => Binding::Literal {
                        raw: value.clone(),
                        hint: *hint,
                    },
                    FilterValue::Caller => Binding::Caller,
                    FilterValue::User => Binding::User,
                },
            })
            .collect();

        Ok(ValidatedStep {
            idx: step.idx,
            name: step.name.clone(),
            table: step.table.clone(),
            action: step.action,
            multiple: step.multiple,
            columns: step.columns.clone(),
            values,
            filters,
            order,
            limit: step.limit,
        })
    }

    /// Resolve a step reference to the producing step's position
    fn link_reference(
        position: usize,
        step: &FunctionStep,
        target: &str,
        ordered: &[&FunctionStep],
        positions: &HashMap<&str, usize>,
    ) -> Result<Binding, ValidationError> {
        let Some(&target_position) = positions.get(target) else {
            return Err(ValidationError::MissingReferencedStep {
                step: step.label(),
                reference: target.to_string(),
            });
        };

        if target_position >= position {
            return Err(ValidationError::ForwardOrSelfReference {
                step: step.label(),
                reference: target.to_string(),
            });
        }

        let producer = ordered[target_position];
        if producer.action != Action::Insert || producer.multiple {
            return Err(ValidationError::fields(
                step,
                format!(
                    "references '{}', which is not a single-row insert",
                    target
                ),
            ));
        }

        Ok(Binding::StepResult {
            position: target_position,
            step: target.to_string(),
        })
    }
}

fn fingerprint(definition: &FunctionDefinition) -> String {
    let canonical = serde_json::to_vec(definition).unwrap_or_default();
    blake3::hash(&canonical).to_hex().to_string()
}
