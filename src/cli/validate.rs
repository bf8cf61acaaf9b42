// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Validate command - check a function definition

use std::path::PathBuf;

use colored::Colorize;
use miette::Result;

use super::load_definition;
use crate::errors::CrudflowError;
use crate::pipeline::StepResolver;
use crate::utils::{print_error, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(file: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating function definition...".bold());
    println!();

    let definition = load_definition(&file)?;
    print_success(&format!("Parsed '{}' ({} steps)", definition.name, definition.steps.len()));

    let pipeline = match StepResolver::validate(&definition) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            print_error(&e.to_string());
            println!();
            return Err(CrudflowError::from(e).into());
        }
    };
    print_success("Step references and fields are valid");

    let warnings = StepResolver::warnings(&definition);
    if !warnings.is_empty() {
        print_section("Warnings");
        for warning in &warnings {
            print_warning(warning);
        }
    }

    if verbose {
        print_section("Execution order");
        for step in pipeline.steps() {
            let multiple = if step.multiple { " (multiple)" } else { "" };
            println!(
                "    {:>4}  {} {} {}{}",
                step.idx,
                step.label().bold(),
                step.action,
                step.table,
                multiple.dimmed()
            );
        }
        println!();
        println!("  Fingerprint: {}", pipeline.fingerprint().dimmed());
    }

    println!();
    println!("{}", "Function definition is valid!".green().bold());
    Ok(())
}
