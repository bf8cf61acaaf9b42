// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Route handlers

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{ApiError, AppState, REQUEST_TIMEOUT_HEADER, TRACING_TARGET};
use crate::gateway::{Page, Row};
use crate::pipeline::{Deadline, FunctionDefinition, FunctionStep};
use crate::service::{FunctionDetail, FunctionSummary};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "steps")]
    pub functions: Vec<FunctionStep>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BrowseQuery {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Authenticated caller id, as set by the upstream auth layer
fn caller(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get(&state.identity_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
}

/// Invocation deadline: the caller's request, capped by the server limit
fn deadline(state: &AppState, headers: &HeaderMap) -> ApiResult<Deadline> {
    let requested = match headers.get(REQUEST_TIMEOUT_HEADER) {
        None => None,
        Some(value) => {
            let millis = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    ApiError::bad_request(format!(
                        "{} must be a whole number of milliseconds",
                        REQUEST_TIMEOUT_HEADER
                    ))
                })?;
            Some(Duration::from_millis(millis))
        }
    };

    let budget = requested.map_or(state.max_timeout, |r| r.min(state.max_timeout));
    Ok(Deadline::after(budget))
}

#[tracing::instrument(skip_all)]
pub async fn create_function(
    State(state): State<AppState>,
    payload: Result<Json<FunctionDefinition>, JsonRejection>,
) -> ApiResult<Json<FunctionDetail>> {
    let definition = body(payload)?;
    Ok(Json(state.service.create(definition).await?))
}

#[tracing::instrument(skip(state, payload))]
pub async fn update_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> ApiResult<Json<FunctionDetail>> {
    let request = body(payload)?;
    if let Some(body_name) = request.name.as_deref() {
        if body_name != name {
            return Err(ApiError::bad_request(format!(
                "body names '{}' but the path names '{}'",
                body_name, name
            )));
        }
    }

    Ok(Json(state.service.update(&name, request.functions).await?))
}

pub async fn list_functions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<FunctionSummary>>> {
    Ok(Json(state.service.list(query.search.as_deref()).await?))
}

pub async fn function_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<FunctionDetail>> {
    Ok(Json(state.service.detail(&name).await?))
}

#[tracing::instrument(skip(state))]
pub async fn delete_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.service.delete(&name).await?;
    Ok(Json(json!({ "message": "success" })))
}

/// Invoke a function.
///
/// The pipeline runs on its own task. If this handler is dropped because the
/// client went away, the drop guard cancels the token and the pipeline stops
/// before its next step.
#[tracing::instrument(skip(state, headers, payload))]
pub async fn invoke_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let user_id = caller(&state, &headers);
    let deadline = deadline(&state, &headers)?;

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let service = state.service.clone();

    let task = tokio::spawn(async move {
        service
            .invoke(&name, request.data, user_id, deadline, &cancel)
            .await
    });

    let outcome = task.await.map_err(|e| {
        tracing::error!(target: TRACING_TARGET, error = %e, "Invocation task failed");
        ApiError::internal("invocation task failed")
    })?;
    guard.disarm();

    Ok(Json(outcome?))
}

pub async fn browse_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(query): Query<BrowseQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Row>>> {
    let user_id = caller(&state, &headers);
    let rows = state
        .service
        .browse(
            &table,
            query.filter.as_deref(),
            query.sort.as_deref(),
            Page::new(query.limit, query.offset),
            user_id.as_deref(),
        )
        .await?;
    Ok(Json(rows))
}
