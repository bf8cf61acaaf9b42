// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! CLI command definitions and handlers

pub mod graph;
pub mod run;
pub mod serve;
pub mod validate;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::ServerConfig;
use crate::errors::{CrudflowError, CrudflowResult};
use crate::pipeline::FunctionDefinition;

/// Declarative multi-step CRUD pipelines
#[derive(Parser, Debug)]
#[clap(
    name = "crudflow",
    version,
    about = "Compose insert, update, fetch and delete steps into callable functions",
    long_about = None,
    after_help = "Examples:\n\
        crudflow serve --table orders       Serve the HTTP API\n\
        crudflow validate order.yaml        Check a function definition\n\
        crudflow graph order.yaml -f dot    Render step references\n\
        crudflow run order.yaml --data '{\"total\": 3}' --user 7\n\n\
        See 'crudflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve(ServerConfig),

    /// Validate a function definition file (YAML or JSON)
    Validate {
        /// Definition file
        file: PathBuf,
    },

    /// Show a function's step references as a graph
    Graph {
        /// Definition file
        file: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Run a function once against an in-memory gateway
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Definition file
    pub file: PathBuf,

    /// Caller data as a JSON object
    #[clap(short, long, default_value = "{}")]
    pub data: String,

    /// JSON file of initial table contents
    #[clap(long)]
    pub seed: Option<PathBuf>,

    /// Authenticated caller id
    #[clap(short, long)]
    pub user: Option<String>,

    /// Invocation deadline in milliseconds
    #[clap(long)]
    pub timeout_ms: Option<u64>,

    /// Print every table after the run
    #[clap(long)]
    pub dump: bool,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load a definition file for a command
pub(crate) fn load_definition(path: &Path) -> CrudflowResult<FunctionDefinition> {
    if !path.exists() {
        return Err(CrudflowError::DefinitionNotFound {
            path: path.to_path_buf(),
        });
    }
    FunctionDefinition::from_file(path)
}
