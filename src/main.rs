// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! crudflow - Declarative CRUD Pipelines

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crudflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crudflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !crudflow::utils::should_use_colors() {
        colored::control::set_override(false);
    }

    let cli = Cli::parse();

    // Dispatch to command handlers
    match cli.command {
        Commands::Serve(config) => crudflow::cli::serve::run(config, cli.verbose).await,
        Commands::Validate { file } => crudflow::cli::validate::run(file, cli.verbose).await,
        Commands::Graph { file, format } => {
            crudflow::cli::graph::run(file, format, cli.verbose).await
        }
        Commands::Run(args) => crudflow::cli::run::run(args, cli.verbose).await,
    }
}
