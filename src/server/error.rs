// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! HTTP error responses
//!
//! Every failure leaves the server as `{ "error", "kind", "step"? }` with a
//! status chosen from the error's kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::TRACING_TARGET;
use crate::errors::CrudflowError;
use crate::gateway::{FilterParseError, GatewayError};
use crate::pipeline::{ResolveError, StepErrorKind};

/// The step a failed invocation stopped at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub idx: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<&'a FailedStep>,
}

/// The error type for HTTP handlers
#[derive(Debug, Clone)]
#[must_use = "errors do nothing unless turned into a response"]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    step: Option<FailedStep>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            step: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

fn status_of(error: &CrudflowError) -> StatusCode {
    match error {
        CrudflowError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CrudflowError::FunctionNotFound { .. } | CrudflowError::DefinitionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        CrudflowError::FunctionExists { .. } => StatusCode::CONFLICT,
        CrudflowError::StepFailed { failure, .. } => match &failure.kind {
            StepErrorKind::Resolve(ResolveError::AuthRequired) => StatusCode::UNAUTHORIZED,
            StepErrorKind::Resolve(ResolveError::MissingStepResult { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            StepErrorKind::Resolve(_) => StatusCode::BAD_REQUEST,
            StepErrorKind::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StepErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            StepErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        },
        CrudflowError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        CrudflowError::InvalidFilter {
            source: FilterParseError::AuthRequired,
        } => StatusCode::UNAUTHORIZED,
        CrudflowError::InvalidFilter { .. } => StatusCode::BAD_REQUEST,
        CrudflowError::Gateway(GatewayError::UnknownTable { .. }) => StatusCode::NOT_FOUND,
        CrudflowError::Yaml { .. } | CrudflowError::Json { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CrudflowError> for ApiError {
    fn from(error: CrudflowError) -> Self {
        let step = match &error {
            CrudflowError::StepFailed { failure, .. } => Some(FailedStep {
                idx: failure.idx,
                name: failure.label(),
            }),
            _ => None,
        };

        Self {
            status: status_of(&error),
            kind: error.kind(),
            message: error.to_string(),
            step,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                target: TRACING_TARGET,
                status = self.status.as_u16(),
                kind = self.kind,
                error = %self.message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                target: TRACING_TARGET,
                status = self.status.as_u16(),
                kind = self.kind,
                error = %self.message,
                "Request rejected"
            );
        }

        let body = ErrorBody {
            error: &self.message,
            kind: self.kind,
            step: self.step.as_ref(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Action, StepFailure, ValidationError};

    fn failed(kind: StepErrorKind) -> ApiError {
        CrudflowError::step_failed(
            "checkout",
            StepFailure {
                idx: 2,
                name: None,
                action: Action::Insert,
                kind,
            },
        )
        .into()
    }

    #[test]
    fn test_status_mapping() {
        let validation: ApiError = CrudflowError::from(ValidationError::DuplicateStepName {
            name: "a".into(),
        })
        .into();
        assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(validation.kind(), "DuplicateStepName");

        assert_eq!(
            failed(StepErrorKind::Resolve(ResolveError::AuthRequired)).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            failed(StepErrorKind::Resolve(ResolveError::MissingInput { column: "x".into() })).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            failed(StepErrorKind::Storage(GatewayError::storage("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(failed(StepErrorKind::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);

        let exists: ApiError = CrudflowError::FunctionExists { name: "f".into() }.into();
        assert_eq!(exists.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_step_is_reported() {
        let error = failed(StepErrorKind::Timeout);
        assert_eq!(
            error.step,
            Some(FailedStep {
                idx: 2,
                name: "step_2".into()
            })
        );
    }
}
