// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! HTTP server
//!
//! | Method   | Path                     | Purpose                      |
//! |----------|--------------------------|------------------------------|
//! | `POST`   | `/api/function/create`   | create a function            |
//! | `GET`    | `/api/function`          | list functions (`?search=`)  |
//! | `GET`    | `/api/function/{name}`   | function detail              |
//! | `PUT`    | `/api/function/{name}`   | replace a function's steps   |
//! | `DELETE` | `/api/function/{name}`   | delete a function            |
//! | `POST`   | `/api/{name}`            | invoke a function            |
//! | `GET`    | `/api/table/{table}`     | browse a table               |

mod error;
mod handlers;

pub use error::{ApiError, FailedStep};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{seeded_gateway, ServerConfig};
use crate::service::FunctionService;
use crate::store::{DefinitionStore, FilesystemStore, MemoryStore};

pub const TRACING_TARGET: &str = "crudflow::server";

/// Header a caller may use to ask for a shorter invocation deadline
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    service: Arc<FunctionService>,
    identity_header: HeaderName,
    max_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<FunctionService>, identity_header: HeaderName, max_timeout: Duration) -> Self {
        Self {
            service,
            identity_header,
            max_timeout,
        }
    }

    pub fn service(&self) -> &Arc<FunctionService> {
        &self.service
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/function/create", post(handlers::create_function))
        .route("/api/function", get(handlers::list_functions))
        .route(
            "/api/function/{name}",
            get(handlers::function_detail)
                .put(handlers::update_function)
                .delete(handlers::delete_function),
        )
        .route("/api/table/{table}", get(handlers::browse_table))
        .route("/api/{name}", post(handlers::invoke_function))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and run until Ctrl+C or SIGTERM
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let store: Arc<dyn DefinitionStore> = if config.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let dir = config
            .store_dir()
            .context("no store directory could be determined")?;
        tracing::info!(target: TRACING_TARGET, dir = %dir.display(), "Using filesystem store");
        Arc::new(FilesystemStore::new(dir)?)
    };

    let gateway = seeded_gateway(config.seed.as_deref(), &config.tables)?;
    tracing::info!(
        target: TRACING_TARGET,
        tables = ?gateway.table_names(),
        "Memory gateway ready"
    );

    let service = Arc::new(FunctionService::new(store, Arc::new(gateway)));
    service.warm().await?;

    let state = AppState::new(service, config.identity_header()?, config.request_timeout());
    let app = router(state);

    let addr = config.server_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!(target: TRACING_TARGET, %addr, "Server is ready and listening for connections");
    if config.binds_to_all_interfaces() {
        tracing::warn!(
            target: TRACING_TARGET,
            "Server is bound to all interfaces. Ensure firewall rules are properly configured."
        );
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!(target: TRACING_TARGET, "Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: TRACING_TARGET, error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(target: TRACING_TARGET, error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!(target: TRACING_TARGET, "Shutdown signal received");
}
