// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Pipeline definitions, validation and execution
//!
//! A [`FunctionDefinition`] is the authored form of a pipeline. It becomes a
//! [`ValidatedPipeline`] through [`StepResolver`], and runs through
//! [`PipelineExecutor`] with a fresh [`ExecutionContext`] per invocation.

mod coercion;
mod dag;
mod definition;
mod executor;
mod token;
mod validated;
mod validation;

pub use coercion::{coerce, CoercionError, TypeHint};
pub use dag::ReferenceGraph;
pub use definition::*;
pub use executor::{
    Deadline, PipelineExecutor, PipelineResult, RunState, StepErrorKind, StepFailure, StepOutcome,
    StepReport,
};
pub use token::{
    ExecutionContext, Requirement, ResolveError, StepInput, TokenResolver, CALLER_FILTER_KEY,
};
pub use validated::{Binding, BoundFilter, ValidatedPipeline, ValidatedStep};
pub use validation::{check_name, StepResolver, ValidationError, MAX_NAME_LEN};
