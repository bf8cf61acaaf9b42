// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Call-time value resolution
//!
//! Everything that changes between invocations lives in an
//! [`ExecutionContext`]; the validated pipeline itself is never touched. A
//! [`TokenResolver`] reads the context to turn each [`Binding`] into a
//! concrete value right before a step is dispatched.

use serde_json::{Map, Value};
use thiserror::Error;

use super::coercion::{coerce, CoercionError};
use super::validated::{Binding, ValidatedStep};
use super::Action;
use crate::gateway::{
    Assignment, Changes, Condition, Filter, FilterParseError, Operator, Row, PRIMARY_KEY,
};

pub const TRACING_TARGET: &str = "crudflow::token";

/// Input key a fetch or delete caller may use to narrow the step's rows
pub const CALLER_FILTER_KEY: &str = "filter";

/// Why a binding could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("an authenticated caller is required")]
    AuthRequired,

    #[error("missing required input '{column}'")]
    MissingInput { column: String },

    #[error("value for '{column}' is invalid: {source}")]
    TypeCoercion {
        column: String,
        #[source]
        source: CoercionError,
    },

    #[error("no result recorded for step '{step}'")]
    MissingStepResult { step: String },

    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AuthRequired",
            Self::MissingInput { .. } => "MissingInput",
            Self::TypeCoercion { .. } => "TypeCoercion",
            Self::MissingStepResult { .. } => "MissingStepResult",
            Self::MalformedInput { .. } => "MalformedInput",
        }
    }
}

/// Whether an absent caller value is an error or just skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// The part of the caller payload a step reads
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput<'a> {
    Single(&'a Row),
    Many(Vec<&'a Row>),
}

impl<'a> StepInput<'a> {
    /// Input rows in payload order
    pub fn rows(&self) -> Vec<&'a Row> {
        match self {
            Self::Single(row) => vec![*row],
            Self::Many(rows) => rows.clone(),
        }
    }
}

/// Per-invocation state. Never shared between invocations.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    payload: Row,
    user_id: Option<String>,
    step_results: Vec<Option<Value>>,
}

impl ExecutionContext {
    pub fn new(payload: Row, user_id: Option<String>) -> Self {
        Self {
            payload,
            user_id,
            step_results: Vec::new(),
        }
    }

    /// Build a context from a raw `data` value; `null` means no input
    pub fn from_value(data: Value, user_id: Option<String>) -> Result<Self, ResolveError> {
        match data {
            Value::Object(payload) => Ok(Self::new(payload, user_id)),
            Value::Null => Ok(Self::new(Map::new(), user_id)),
            other => Err(ResolveError::MalformedInput {
                reason: format!("data must be an object, got {}", json_type(&other)),
            }),
        }
    }

    pub fn payload(&self) -> &Row {
        &self.payload
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Reset step results for a pipeline of `steps` steps
    pub(crate) fn prepare(&mut self, steps: usize) {
        self.step_results = vec![None; steps];
    }

    /// Record the primary key produced by the step at `position`
    pub fn record_result(&mut self, position: usize, key: Value) {
        if position >= self.step_results.len() {
            self.step_results.resize(position + 1, None);
        }
        self.step_results[position] = Some(key);
    }

    pub fn step_result(&self, position: usize) -> Option<&Value> {
        self.step_results.get(position).and_then(Option::as_ref)
    }

    /// Select the input a step reads.
    ///
    /// A named step whose name is a payload key reads that entry; otherwise
    /// the step reads the whole payload.
    pub fn input_for(&self, step: &ValidatedStep) -> Result<StepInput<'_>, ResolveError> {
        let many = step.takes_many_rows();
        let scoped = step.name.as_deref().and_then(|name| self.payload.get(name));

        match scoped {
            Some(Value::Object(row)) if many => Ok(StepInput::Many(vec![row])),
            Some(Value::Object(row)) => Ok(StepInput::Single(row)),
            Some(Value::Array(_)) if !many => Err(ResolveError::MalformedInput {
                reason: format!("step '{}' expects one object, got an array", step.label()),
            }),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| ResolveError::MalformedInput {
                        reason: format!(
                            "step '{}' expects an array of objects, found {}",
                            step.label(),
                            json_type(item)
                        ),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(StepInput::Many),
            _ if many => Ok(StepInput::Many(vec![&self.payload])),
            _ => Ok(StepInput::Single(&self.payload)),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Resolves bindings against one [`ExecutionContext`]
pub struct TokenResolver<'a> {
    context: &'a ExecutionContext,
}

impl<'a> TokenResolver<'a> {
    pub fn new(context: &'a ExecutionContext) -> Self {
        Self { context }
    }

    /// Resolve a single binding for `column`.
    ///
    /// Returns `Ok(None)` only for an absent optional caller value.
    pub fn resolve(
        &self,
        binding: &Binding,
        column: &str,
        input: &Row,
        requirement: Requirement,
    ) -> Result<Option<Value>, ResolveError> {
        match binding {
            Binding::Literal { raw, hint } => coerce(raw, *hint)
                .map(Some)
                .map_err(|source| ResolveError::TypeCoercion {
                    column: column.to_string(),
                    source,
                }),
            Binding::Caller => match (input.get(column), requirement) {
                (Some(value), _) => Ok(Some(value.clone())),
                (None, Requirement::Optional) => Ok(None),
                (None, Requirement::Required) => Err(ResolveError::MissingInput {
                    column: column.to_string(),
                }),
            },
            Binding::User => self
                .context
                .user_id()
                .map(|id| Some(Value::String(id.to_string())))
                .ok_or(ResolveError::AuthRequired),
            Binding::StepResult { position, step } => {
                match self.context.step_result(*position) {
                    Some(key) => Ok(Some(key.clone())),
                    None => {
                        tracing::error!(
                            target: TRACING_TARGET,
                            step = %step,
                            position,
                            "Step result missing for a validated reference"
                        );
                        Err(ResolveError::MissingStepResult { step: step.clone() })
                    }
                }
            }
        }
    }

    /// Resolve an insert's value bindings into the row sent to the gateway.
    /// Every value is required.
    pub fn resolve_row(&self, step: &ValidatedStep, input: &Row) -> Result<Row, ResolveError> {
        let mut row = Row::new();
        for (column, binding) in &step.values {
            if let Some(value) = self.resolve(binding, column, input, Requirement::Required)? {
                row.insert(column.clone(), value);
            }
        }

        if row.is_empty() {
            let column = step
                .values
                .first()
                .map(|(column, _)| column.clone())
                .unwrap_or_default();
            return Err(ResolveError::MissingInput { column });
        }

        Ok(row)
    }

    /// Resolve an update's column assignments.
    ///
    /// Values are optional, but at least one column must be assigned. A
    /// caller value like `$stock - 1` becomes a relative assignment, applied
    /// to the stored row by the gateway.
    pub fn resolve_changes(&self, step: &ValidatedStep, input: &Row) -> Result<Changes, ResolveError> {
        let mut changes = Changes::new();
        for (column, binding) in &step.values {
            let Some(value) = self.resolve(binding, column, input, Requirement::Optional)? else {
                continue;
            };
            let relative = match (binding, &value) {
                (Binding::Caller, Value::String(text)) => Assignment::parse_relative(text),
                _ => None,
            };
            changes.insert(column.clone(), relative.unwrap_or(Assignment::Set(value)));
        }

        if changes.is_empty() {
            let column = step
                .values
                .first()
                .map(|(column, _)| column.clone())
                .unwrap_or_default();
            return Err(ResolveError::MissingInput { column });
        }

        Ok(changes)
    }

    /// Resolve a step's filter predicates.
    ///
    /// An update without predicates targets the row whose primary key the
    /// caller supplied. Fetch and delete steps also honour a `filter`
    /// expression in their input, AND-ed with the bound predicates.
    pub fn resolve_filter(&self, step: &ValidatedStep, input: &Row) -> Result<Filter, ResolveError> {
        if step.filters.is_empty() && step.action == Action::Update {
            let key = input
                .get(PRIMARY_KEY)
                .cloned()
                .ok_or_else(|| ResolveError::MissingInput {
                    column: PRIMARY_KEY.to_string(),
                })?;
            return Ok(Filter::conditions(vec![Condition::new(
                PRIMARY_KEY,
                Operator::Eq,
                key,
            )]));
        }

        let bound = step
            .filters
            .iter()
            .map(|predicate| {
                let value = self
                    .resolve(&predicate.value, &predicate.column, input, Requirement::Required)?
                    .unwrap_or(Value::Null);
                Ok(Condition::new(predicate.column.clone(), predicate.op, value))
            })
            .collect::<Result<Vec<_>, ResolveError>>()
            .map(Filter::conditions)?;

        match (step.action, input.get(CALLER_FILTER_KEY)) {
            (Action::Fetch | Action::Delete, Some(expr)) => Ok(bound.and(self.caller_filter(expr)?)),
            _ => Ok(bound),
        }
    }

    fn caller_filter(&self, expr: &Value) -> Result<Filter, ResolveError> {
        let Value::String(expr) = expr else {
            return Err(ResolveError::MalformedInput {
                reason: format!("'{}' must be a filter expression string", CALLER_FILTER_KEY),
            });
        };

        Filter::parse(expr, self.context.user_id()).map_err(|e| match e {
            FilterParseError::AuthRequired => ResolveError::AuthRequired,
            other => ResolveError::MalformedInput {
                reason: other.to_string(),
            },
        })
    }
}
