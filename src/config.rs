// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Server configuration
//!
//! Every option can be given on the command line or through a `CRUDFLOW_*`
//! environment variable.
//!
//! ```bash
//! crudflow serve --port 8080 --table orders --table items
//! CRUDFLOW_PORT=8080 CRUDFLOW_TABLES=orders,items crudflow serve
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result as AnyhowResult};
use axum::http::HeaderName;
use clap::Args;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::errors::{CrudflowError, CrudflowResult};
use crate::gateway::MemoryGateway;

pub const TRACING_TARGET: &str = "crudflow::config";

/// Longest request timeout accepted, in seconds
const MAX_REQUEST_TIMEOUT: u64 = 300;

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct ServerConfig {
    /// Host address to bind to
    #[arg(long, env = "CRUDFLOW_HOST", default_value = "127.0.0.1")]
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// TCP port to listen on (1024-65535)
    #[arg(short = 'p', long, env = "CRUDFLOW_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Upper bound, in seconds, for a single function invocation.
    ///
    /// Callers may ask for less with the `x-request-timeout-ms` header, never
    /// for more.
    #[arg(long, env = "CRUDFLOW_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    /// Directory holding function definitions (one JSON file per function)
    #[arg(long, env = "CRUDFLOW_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Keep definitions in memory only
    #[arg(long, env = "CRUDFLOW_EPHEMERAL")]
    #[serde(default)]
    pub ephemeral: bool,

    /// JSON file of initial table contents: `{ "<table>": [rows...] }`
    #[arg(long, env = "CRUDFLOW_SEED")]
    pub seed: Option<PathBuf>,

    /// Empty tables to create at startup
    #[arg(long = "table", env = "CRUDFLOW_TABLES", value_delimiter = ',')]
    #[serde(default)]
    pub tables: Vec<String>,

    /// Request header carrying the authenticated caller's id
    #[arg(long, env = "CRUDFLOW_IDENTITY_HEADER", default_value = "x-user-id")]
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

impl ServerConfig {
    /// Check option ranges and formats
    pub fn validate(&self) -> AnyhowResult<()> {
        if self.port < 1024 {
            return Err(anyhow!(
                "Port {} is below 1024. Use ports 1024-65535 to avoid requiring root privileges.",
                self.port
            ));
        }

        if self.request_timeout == 0 || self.request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(anyhow!(
                "Request timeout {} seconds is invalid. Must be between 1 and {} seconds.",
                self.request_timeout,
                MAX_REQUEST_TIMEOUT
            ));
        }

        self.identity_header()?;

        if !self.ephemeral && self.store_dir().is_none() {
            return Err(anyhow!(
                "No store directory could be determined. Pass --store-dir or --ephemeral."
            ));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn identity_header(&self) -> AnyhowResult<HeaderName> {
        HeaderName::from_bytes(self.identity_header.trim().as_bytes()).map_err(|e| {
            anyhow!(
                "Identity header '{}' is not a valid header name: {}",
                self.identity_header,
                e
            )
        })
    }

    /// Configured store directory, or the platform data directory
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store_dir.clone().or_else(|| {
            ProjectDirs::from("dev", "crudflow", "crudflow")
                .map(|dirs| dirs.data_dir().join("functions"))
        })
    }

    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.host {
            IpAddr::V4(addr) => addr.is_unspecified(),
            IpAddr::V6(addr) => addr.is_unspecified(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 3000,
            request_timeout: 30,
            store_dir: None,
            ephemeral: false,
            seed: None,
            tables: Vec::new(),
            identity_header: default_identity_header(),
        }
    }
}

/// Build an in-memory gateway from an optional seed file plus extra tables
pub fn seeded_gateway(seed: Option<&Path>, tables: &[String]) -> CrudflowResult<MemoryGateway> {
    let gateway = match seed {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).map_err(|e| CrudflowError::FileReadError {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                })?;
            let value: serde_json::Value = serde_json::from_str(&content)?;
            let gateway = MemoryGateway::from_seed(&value)?;
            tracing::debug!(
                target: TRACING_TARGET,
                seed = %path.display(),
                tables = gateway.table_names().len(),
                "Seed loaded"
            );
            gateway
        }
        None => MemoryGateway::new(),
    };

    for table in tables.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        gateway.create_table(table);
    }

    Ok(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig {
            ephemeral: true,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.server_addr().port(), 3000);
        assert!(!config.binds_to_all_interfaces());
    }

    #[test]
    fn test_invalid_values() {
        let low_port = ServerConfig {
            port: 80,
            ephemeral: true,
            ..ServerConfig::default()
        };
        assert!(low_port.validate().is_err());

        let no_timeout = ServerConfig {
            request_timeout: 0,
            ephemeral: true,
            ..ServerConfig::default()
        };
        assert!(no_timeout.validate().is_err());

        let bad_header = ServerConfig {
            identity_header: "x user".into(),
            ephemeral: true,
            ..ServerConfig::default()
        };
        assert!(bad_header.validate().is_err());
    }

    #[test]
    fn test_explicit_store_dir_wins() {
        let config = ServerConfig {
            store_dir: Some(PathBuf::from("/srv/functions")),
            ..ServerConfig::default()
        };
        assert_eq!(config.store_dir(), Some(PathBuf::from("/srv/functions")));
    }

    #[test]
    fn test_seeded_gateway() {
        let temp = TempDir::new().unwrap();
        let seed = temp.path().join("seed.json");
        std::fs::write(&seed, r#"{"orders": [{"total": 3}]}"#).unwrap();

        let gateway = seeded_gateway(Some(&seed), &["items".to_string(), " ".to_string()]).unwrap();
        assert_eq!(gateway.table_names(), vec!["items", "orders"]);
        assert_eq!(gateway.rows("orders").unwrap().len(), 1);

        assert!(seeded_gateway(Some(&temp.path().join("missing.json")), &[]).is_err());
    }
}
