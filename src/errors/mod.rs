// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Error types
//!
//! Every fallible crudflow operation above the pipeline core reports a
//! [`CrudflowError`]. Variants carry miette diagnostic codes and, where there
//! is something useful to say, a help line for the CLI.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::gateway::{FilterParseError, GatewayError};
use crate::pipeline::{ResolveError, StepErrorKind, StepFailure, ValidationError};

/// Result type for crudflow operations
pub type CrudflowResult<T> = Result<T, CrudflowError>;

/// Main error type for crudflow
#[derive(Error, Debug, Diagnostic)]
pub enum CrudflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid function definition: {source}")]
    #[diagnostic(code(crudflow::invalid_definition))]
    Validation {
        #[source]
        source: ValidationError,
        #[help]
        help: Option<String>,
    },

    #[error("Function '{name}' not found")]
    #[diagnostic(
        code(crudflow::function_not_found),
        help("List the available functions with GET /api/function")
    )]
    FunctionNotFound { name: String },

    #[error("Function '{name}' already exists")]
    #[diagnostic(
        code(crudflow::function_exists),
        help("Use PUT /api/function/{name} to replace it")
    )]
    FunctionExists { name: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Function '{function}' failed: {failure}")]
    #[diagnostic(code(crudflow::step_failed))]
    StepFailed {
        function: String,
        #[source]
        failure: StepFailure,
        #[help]
        help: Option<String>,
    },

    #[error("Invalid input: {source}")]
    #[diagnostic(code(crudflow::invalid_input))]
    InvalidInput {
        #[source]
        source: ResolveError,
    },

    #[error("Invalid filter: {source}")]
    #[diagnostic(
        code(crudflow::invalid_filter),
        help("Filters look like: column = \"value\" AND other > 3")
    )]
    InvalidFilter {
        #[source]
        source: FilterParseError,
    },

    #[error("Storage error: {0}")]
    #[diagnostic(code(crudflow::storage_error))]
    Gateway(#[from] GatewayError),

    // ─────────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Definition store error: {message}")]
    #[diagnostic(code(crudflow::store_error))]
    StoreError { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Definition file not found: {path}")]
    #[diagnostic(
        code(crudflow::definition_not_found),
        help("Pass a YAML or JSON file containing 'name' and 'functions'")
    )]
    DefinitionNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(crudflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(crudflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(crudflow::invalid_config))]
    InvalidConfig { reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/Serialization Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(crudflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(crudflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(crudflow::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for CrudflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for CrudflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for CrudflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<ValidationError> for CrudflowError {
    fn from(source: ValidationError) -> Self {
        let help = Self::help_for_validation(&source);
        Self::Validation { source, help }
    }
}

impl From<FilterParseError> for CrudflowError {
    fn from(source: FilterParseError) -> Self {
        Self::InvalidFilter { source }
    }
}

impl CrudflowError {
    /// Wrap a failed invocation
    pub fn step_failed(function: &str, failure: StepFailure) -> Self {
        let help = Self::help_for_step(&failure.kind);
        Self::StepFailed {
            function: function.to_string(),
            failure,
            help,
        }
    }

    /// Stable error kind, used in API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { source, .. } => source.kind(),
            Self::FunctionNotFound { .. } => "NotFound",
            Self::FunctionExists { .. } => "AlreadyExists",
            Self::StepFailed { failure, .. } => failure.kind.kind(),
            Self::InvalidInput { source } => source.kind(),
            Self::InvalidFilter {
                source: FilterParseError::AuthRequired,
            } => "AuthRequired",
            Self::InvalidFilter { .. } => "InvalidFilter",
            Self::Gateway(GatewayError::UnknownTable { .. }) => "UnknownTable",
            Self::Gateway(_) => "StorageError",
            Self::StoreError { .. } => "StoreError",
            Self::DefinitionNotFound { .. } => "NotFound",
            Self::FileReadError { .. } | Self::FileWriteError { .. } | Self::Io { .. } => "IoError",
            Self::InvalidConfig { .. } => "InvalidConfig",
            Self::Yaml { .. } | Self::Json { .. } => "ParseError",
        }
    }

    fn help_for_validation(error: &ValidationError) -> Option<String> {
        match error {
            ValidationError::ForwardOrSelfReference { reference, .. } => Some(format!(
                "Give '{}' a smaller idx than the steps that read its key",
                reference
            )),
            ValidationError::MissingReferencedStep { reference, .. } => Some(format!(
                "Name an earlier insert step '{}', or fix the reference",
                reference
            )),
            ValidationError::NonMonotonicIndex { .. } => {
                Some("Every step needs its own idx; steps run in ascending idx order".into())
            }
            ValidationError::EmptyPipeline { .. } => Some("Add at least one step".into()),
            _ => None,
        }
    }

    fn help_for_step(kind: &StepErrorKind) -> Option<String> {
        match kind {
            StepErrorKind::Resolve(ResolveError::AuthRequired) => {
                Some("This function reads the caller's identity; call it as an authenticated user".into())
            }
            StepErrorKind::Resolve(ResolveError::MissingInput { column }) => {
                Some(format!("Include '{}' in the request data", column))
            }
            StepErrorKind::Timeout => {
                Some("Raise the request timeout or reduce the work done per call".into())
            }
            StepErrorKind::Resolve(ResolveError::MissingStepResult { .. }) => {
                Some("This is a bug in crudflow; please report it".into())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Action;

    #[test]
    fn test_validation_error_gets_help() {
        let err: CrudflowError = ValidationError::ForwardOrSelfReference {
            step: "item".into(),
            reference: "order".into(),
        }
        .into();

        assert_eq!(err.kind(), "ForwardOrSelfReference");
        match err {
            CrudflowError::Validation { help, .. } => assert!(help.unwrap().contains("'order'")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_step_failure_kind_passes_through() {
        let failure = StepFailure {
            idx: 3,
            name: Some("order".into()),
            action: Action::Insert,
            kind: StepErrorKind::Resolve(ResolveError::AuthRequired),
        };
        let err = CrudflowError::step_failed("checkout", failure);

        assert_eq!(err.kind(), "AuthRequired");
        assert!(err.to_string().contains("checkout"));
        assert!(err.to_string().contains("'order'"));
    }

    #[test]
    fn test_filter_auth_kind() {
        let err: CrudflowError = FilterParseError::AuthRequired.into();
        assert_eq!(err.kind(), "AuthRequired");
    }
}
