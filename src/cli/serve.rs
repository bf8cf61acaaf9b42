// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Serve command - run the HTTP API

use miette::Result;

use crate::config::ServerConfig;

pub async fn run(config: ServerConfig, _verbose: bool) -> Result<()> {
    crate::server::serve(config)
        .await
        .map_err(|e| miette::miette!("{:#}", e))
}
