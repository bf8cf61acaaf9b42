// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Pipeline executor
//!
//! Runs the steps of a validated pipeline one at a time, in `idx` order,
//! against a [`TableGateway`]. The first failure stops the run. Effects of
//! steps that already succeeded stay committed: there is no rollback.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::definition::step_label;
use super::token::{ExecutionContext, ResolveError, TokenResolver};
use super::validated::{ValidatedPipeline, ValidatedStep};
use super::Action;
use crate::gateway::{Changes, Filter, GatewayError, Page, Row, TableGateway};

pub const TRACING_TARGET: &str = "crudflow::executor";

/// Time budget for a whole invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// No time limit
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
        }
    }

    /// Time left, or `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// Invocation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running { idx: u32 },
    Succeeded,
    Failed { idx: u32 },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running { idx } => write!(f, "running({})", idx),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed { idx } => write!(f, "failed({})", idx),
        }
    }
}

/// What a successful step produced
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Inserted { keys: Vec<Value> },
    Affected { count: u64 },
    Fetched { rows: Vec<Row> },
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted { keys } => write!(f, "{} row(s) inserted", keys.len()),
            Self::Affected { count } => write!(f, "{} row(s) affected", count),
            Self::Fetched { rows } => write!(f, "{} row(s) fetched", rows.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub idx: u32,
    pub name: Option<String>,
    pub action: Action,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

impl StepReport {
    pub fn label(&self) -> String {
        step_label(self.idx, self.name.as_deref())
    }
}

/// Cause of a step failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepErrorKind {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("storage error: {0}")]
    Storage(#[from] GatewayError),

    #[error("deadline exceeded")]
    Timeout,

    #[error("invocation cancelled")]
    Cancelled,
}

impl StepErrorKind {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolve(e) => e.kind(),
            Self::Storage(_) => "StorageError",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// The step that stopped a pipeline, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub idx: u32,
    pub name: Option<String>,
    pub action: Action,
    pub kind: StepErrorKind,
}

impl StepFailure {
    fn new(step: &ValidatedStep, kind: StepErrorKind) -> Self {
        Self {
            idx: step.idx,
            name: step.name.clone(),
            action: step.action,
            kind,
        }
    }

    pub fn label(&self) -> String {
        step_label(self.idx, self.name.as_deref())
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step '{}' (idx {}, {}) failed: {}",
            self.label(),
            self.idx,
            self.action,
            self.kind
        )
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Result of one invocation
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub function: String,
    pub state: RunState,
    /// Reports for the steps that succeeded, in execution order
    pub steps: Vec<StepReport>,
    pub failure: Option<StepFailure>,
    pub duration: Duration,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// `{ "message": "success", <fetch step>: rows, ... }`
    pub fn response_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("message".into(), Value::from("success"));
        for report in &self.steps {
            if let StepOutcome::Fetched { rows } = &report.outcome {
                let rows = rows.iter().cloned().map(Value::Object).collect();
                body.insert(report.label(), Value::Array(rows));
            }
        }
        Value::Object(body)
    }

    /// Success body, or the failure that stopped the run
    pub fn into_response(self) -> Result<Value, StepFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.response_body()),
        }
    }
}

/// Gateway work for one step, fully resolved
enum Dispatch {
    Insert(Vec<Row>),
    Update(Vec<(Filter, Changes)>),
    Fetch(Filter),
    Delete(Filter),
}

/// Pipeline executor
pub struct PipelineExecutor {
    gateway: Arc<dyn TableGateway>,
}

impl PipelineExecutor {
    pub fn new(gateway: Arc<dyn TableGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<dyn TableGateway> {
        &self.gateway
    }

    /// Execute a pipeline.
    ///
    /// Before each step the cancellation token and the deadline are checked;
    /// a step is never started once either has fired. A gateway call already
    /// in flight is not interrupted by cancellation, only by the deadline.
    #[tracing::instrument(
        skip_all,
        fields(function = %pipeline.name(), fingerprint = %pipeline.fingerprint())
    )]
    pub async fn execute(
        &self,
        pipeline: &ValidatedPipeline,
        mut context: ExecutionContext,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let start = Instant::now();
        let mut state = RunState::Pending;
        tracing::debug!(target: TRACING_TARGET, %state, steps = pipeline.steps().len(), "Pipeline accepted");

        context.prepare(pipeline.steps().len());
        let mut reports = Vec::with_capacity(pipeline.steps().len());

        for (position, step) in pipeline.steps().iter().enumerate() {
            state = RunState::Running { idx: step.idx };
            tracing::debug!(
                target: TRACING_TARGET,
                %state,
                step = %step.label(),
                action = %step.action,
                table = %step.table,
                "Step started"
            );

            let started = Instant::now();
            match self.run_step(position, step, &mut context, deadline, cancel).await {
                Ok(outcome) => {
                    tracing::debug!(
                        target: TRACING_TARGET,
                        step = %step.label(),
                        %outcome,
                        "Step completed"
                    );
                    reports.push(StepReport {
                        idx: step.idx,
                        name: step.name.clone(),
                        action: step.action,
                        outcome,
                        duration: started.elapsed(),
                    });
                }
                Err(kind) => {
                    state = RunState::Failed { idx: step.idx };
                    let failure = StepFailure::new(step, kind);
                    tracing::warn!(
                        target: TRACING_TARGET,
                        %state,
                        error = %failure,
                        completed = reports.len(),
                        "Pipeline failed"
                    );
                    return PipelineResult {
                        function: pipeline.name().to_string(),
                        state,
                        steps: reports,
                        failure: Some(failure),
                        duration: start.elapsed(),
                    };
                }
            }
        }

        state = RunState::Succeeded;
        let duration = start.elapsed();
        tracing::info!(
            target: TRACING_TARGET,
            %state,
            duration_ms = duration.as_millis() as u64,
            "Pipeline completed"
        );

        PipelineResult {
            function: pipeline.name().to_string(),
            state,
            steps: reports,
            failure: None,
            duration,
        }
    }

    async fn run_step(
        &self,
        position: usize,
        step: &ValidatedStep,
        context: &mut ExecutionContext,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StepErrorKind> {
        if cancel.is_cancelled() {
            return Err(StepErrorKind::Cancelled);
        }
        if deadline.is_expired() {
            return Err(StepErrorKind::Timeout);
        }

        // Everything is resolved before the first gateway call
        let dispatch = plan(step, context)?;
        let table = step.table.as_str();

        let outcome = match dispatch {
            Dispatch::Insert(rows) => {
                let mut keys = Vec::with_capacity(rows.len());
                for row in rows {
                    keys.push(guarded(deadline, self.gateway.insert(table, row)).await?);
                }
                if step.publishes_key() {
                    if let Some(key) = keys.first() {
                        context.record_result(position, key.clone());
                    }
                }
                StepOutcome::Inserted { keys }
            }
            Dispatch::Update(targets) => {
                let mut count = 0;
                for (filter, changes) in targets {
                    count += guarded(deadline, self.gateway.update(table, &filter, changes)).await?;
                }
                StepOutcome::Affected { count }
            }
            Dispatch::Fetch(filter) => {
                let page = Page::new(step.limit, 0);
                let rows = guarded(
                    deadline,
                    self.gateway
                        .fetch(table, &filter, &step.columns, step.order.as_ref(), page),
                )
                .await?;
                StepOutcome::Fetched { rows }
            }
            Dispatch::Delete(filter) => {
                let count = guarded(deadline, self.gateway.delete(table, &filter)).await?;
                StepOutcome::Affected { count }
            }
        };

        Ok(outcome)
    }
}

/// Resolve a step's input into concrete gateway work
fn plan(step: &ValidatedStep, context: &ExecutionContext) -> Result<Dispatch, ResolveError> {
    let resolver = TokenResolver::new(context);
    let input = context.input_for(step)?;

    Ok(match step.action {
        Action::Insert => Dispatch::Insert(
            input
                .rows()
                .into_iter()
                .map(|row| resolver.resolve_row(step, row))
                .collect::<Result<_, _>>()?,
        ),
        Action::Update => Dispatch::Update(
            input
                .rows()
                .into_iter()
                .map(|row| Ok((resolver.resolve_filter(step, row)?, resolver.resolve_changes(step, row)?)))
                .collect::<Result<_, ResolveError>>()?,
        ),
        Action::Fetch | Action::Delete => {
            let rows = input.rows();
            let empty = Row::new();
            let row = rows.first().copied().unwrap_or(&empty);
            let filter = resolver.resolve_filter(step, row)?;
            if step.action == Action::Fetch {
                Dispatch::Fetch(filter)
            } else {
                Dispatch::Delete(filter)
            }
        }
    })
}

/// Run a gateway call under the remaining budget
async fn guarded<T, F>(deadline: Deadline, call: F) -> Result<T, StepErrorKind>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match deadline.remaining() {
        None => call.await.map_err(StepErrorKind::Storage),
        Some(left) if left.is_zero() => Err(StepErrorKind::Timeout),
        Some(left) => tokio::time::timeout(left, call)
            .await
            .map_err(|_| StepErrorKind::Timeout)?
            .map_err(StepErrorKind::Storage),
    }
}
