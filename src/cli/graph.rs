// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Graph command - visualize step references

use std::path::PathBuf;

use miette::Result;

use super::{load_definition, GraphFormat};
use crate::errors::CrudflowError;
use crate::pipeline::{ReferenceGraph, StepResolver};

/// Run the graph command
pub async fn run(file: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let definition = load_definition(&file)?;
    let pipeline = StepResolver::validate(&definition).map_err(CrudflowError::from)?;
    let graph = ReferenceGraph::build(&pipeline);

    let output = match format {
        GraphFormat::Text => graph.to_text(),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    print!("{}", output);
    Ok(())
}
