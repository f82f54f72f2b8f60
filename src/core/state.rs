// src/core/state.rs

//! The shared, process-wide server state: configuration, the connection
//! registry and the database facade. One instance is created at startup
//! and injected into every connection.

use crate::config::Config;
use crate::core::database::Database;
use crate::core::registry::Registry;
use crate::core::storage::StorageDriver;
use hickory_resolver::TokioAsyncResolver;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct ServerState {
    pub config: Config,
    pub registry: Registry,
    pub database: Database,
    /// Resolver for the reverse lookups of server authentication. Absent
    /// when the system configuration cannot be read; server authentication
    /// is then always rejected.
    pub resolver: Option<TokioAsyncResolver>,
}

impl ServerState {
    pub fn new(config: Config, driver: Arc<dyn StorageDriver>) -> Arc<ServerState> {
        Arc::new_cyclic(|weak_self| {
            let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
                Ok(resolver) => Some(resolver),
                Err(e) => {
                    warn!("Reverse DNS resolver unavailable: {e}");
                    None
                }
            };
            ServerState {
                database: Database::new(driver, config.localdomain.clone(), weak_self.clone()),
                config,
                registry: Registry::new(),
                resolver,
            }
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }
}
