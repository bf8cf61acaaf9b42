// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Run command - execute a function once, locally
//!
//! Uses a fresh in-memory gateway: the seed file (if any) plus an empty table
//! for every table the function touches that the seed did not create.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use tokio_util::sync::CancellationToken;

use super::{load_definition, RunArgs};
use crate::config::seeded_gateway;
use crate::errors::CrudflowError;
use crate::gateway::MemoryGateway;
use crate::pipeline::{
    Deadline, ExecutionContext, PipelineExecutor, StepOutcome, StepResolver, ValidatedPipeline,
};
use crate::utils::{print_error, print_info, print_section, print_success};

/// Run the run command
pub async fn run(args: RunArgs, verbose: bool) -> Result<()> {
    let definition = load_definition(&args.file)?;
    let pipeline = StepResolver::validate(&definition).map_err(CrudflowError::from)?;

    let data: serde_json::Value =
        serde_json::from_str(&args.data).map_err(CrudflowError::from)?;
    let context = ExecutionContext::from_value(data, args.user.clone())
        .map_err(|source| CrudflowError::InvalidInput { source })?;

    let gateway = Arc::new(seeded_gateway(args.seed.as_deref(), &[])?);
    for step in pipeline.steps() {
        gateway.create_table(step.table.as_str());
    }

    let deadline = args
        .timeout_ms
        .map_or_else(Deadline::none, |ms| Deadline::after(Duration::from_millis(ms)));

    println!("{} {}", "Running".bold(), pipeline.name().bold());
    println!();

    let executor = PipelineExecutor::new(gateway.clone());
    let result = executor
        .execute(&pipeline, context, deadline, &CancellationToken::new())
        .await;

    for report in &result.steps {
        print_success(&format!(
            "{} {} {} ({}, {:.1}ms)",
            report.label().bold(),
            report.action,
            step_table(&pipeline, report.idx),
            report.outcome,
            report.duration.as_secs_f64() * 1000.0
        ));
        if verbose {
            if let StepOutcome::Inserted { keys } = &report.outcome {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                print_info(&format!("keys: {}", keys.join(", ")));
            }
        }
    }

    if let Some(failure) = &result.failure {
        print_error(&failure.to_string());
    }

    if args.dump {
        dump_tables(&gateway);
    }

    println!();
    match result.into_response() {
        Ok(body) => {
            let pretty = serde_json::to_string_pretty(&body).into_diagnostic()?;
            println!("{}", pretty);
            Ok(())
        }
        Err(failure) => Err(CrudflowError::step_failed(pipeline.name(), failure).into()),
    }
}

fn step_table(pipeline: &ValidatedPipeline, idx: u32) -> String {
    pipeline
        .steps()
        .iter()
        .find(|s| s.idx == idx)
        .map(|s| s.table.clone())
        .unwrap_or_default()
}

fn dump_tables(gateway: &MemoryGateway) {
    for table in gateway.table_names() {
        print_section(&table);
        let rows = gateway.rows(&table).unwrap_or_default();
        if rows.is_empty() {
            println!("  {}", "(empty)".dimmed());
        }
        for row in rows {
            println!("  {}", serde_json::Value::Object(row));
        }
    }
}
