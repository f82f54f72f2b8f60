// src/config.rs

//! Manages server configuration: loading, validation, and logging directives.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

/// The default request timeout for connections opened by this server.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// The validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The administrative domain this server is authoritative for.
    pub localdomain: String,
    /// The plaintext WebSocket listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// An optional TLS WebSocket listen address.
    #[serde(default)]
    pub listensecure: Option<String>,
    /// Which storage driver to use. Currently only "memory" is built in.
    #[serde(default = "default_database")]
    pub database: String,
    /// Directory where attachment files are stored.
    #[serde(default = "default_basepath")]
    pub basepath: String,
    /// PEM private key, required when `listensecure` is set.
    #[serde(default)]
    pub keyfile: Option<String>,
    /// PEM certificate chain, required when `listensecure` is set.
    #[serde(default)]
    pub certfile: Option<String>,
    /// Per-module log levels, e.g. {"fospd::connection": "debug"}.
    #[serde(default)]
    pub logging: BTreeMap<String, String>,
    /// How long outgoing requests wait for a response.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:1337".to_string()
}
fn default_database() -> String {
    "memory".to_string()
}
fn default_basepath() -> String {
    "fospd_data/attachments".to_string()
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    /// Loads and validates a configuration from a JSON file.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.localdomain.is_empty() {
            return Err(anyhow!("'localdomain' must not be empty"));
        }
        if self.localdomain.contains('@') || self.localdomain.contains('/') {
            return Err(anyhow!(
                "'localdomain' must be a bare domain name, got \"{}\"",
                self.localdomain
            ));
        }
        if self.listensecure.is_some() && (self.keyfile.is_none() || self.certfile.is_none()) {
            return Err(anyhow!(
                "'listensecure' requires both 'keyfile' and 'certfile'"
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("'request_timeout_secs' must be greater than zero"));
        }
        Ok(())
    }

    /// Folds the per-module logging map into an `EnvFilter` directive string.
    /// An empty map yields the plain "info" default.
    pub fn log_filter(&self) -> String {
        let mut directives = vec!["info".to_string()];
        for (module, level) in &self.logging {
            directives.push(format!("{module}={level}"));
        }
        directives.join(",")
    }

    /// The timeout applied to requests sent over connections of this server.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
