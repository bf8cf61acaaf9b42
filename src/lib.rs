// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! # crudflow - Declarative CRUD Pipelines
//!
//! `crudflow` turns a list of insert, update, fetch and delete steps into a
//! named function that can be called over HTTP with a single JSON payload.
//!
//! ## Features
//!
//! - **Validated up front** - step references, names and fields are checked
//!   when a function is saved, not when it runs
//! - **Step chaining** - later steps can read the key an earlier insert produced
//! - **Caller scoping** - values and filters can be bound to the authenticated user
//! - **Pluggable storage** - steps run against any [`gateway::TableGateway`]
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a definition
//! crudflow validate order.yaml
//!
//! # Try it once, locally
//! crudflow run order.yaml --data '{"total": 3}' --user 7
//!
//! # Serve the HTTP API
//! crudflow serve --table orders --table items
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use errors::{CrudflowError, CrudflowResult};
pub use pipeline::{FunctionDefinition, PipelineExecutor, StepResolver, ValidatedPipeline};
pub use service::FunctionService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
