// src/server/initialization.rs

//! Handles the complete server initialization process: storage driver
//! selection, state setup, listener binding and TLS configuration.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;
use crate::core::storage::{MemoryDriver, StorageDriver};
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::info;

/// Initializes all server components before starting the accept loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let driver = setup_driver(&config)?;
    let acceptor = setup_tls(&config)?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(|e| anyhow!("Failed to listen on \"{}\": {e}", config.listen))?;
    info!(
        "fospd serving domain {} on {}",
        config.localdomain, config.listen
    );

    let secure_listener = match &config.listensecure {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow!("Failed to listen on \"{addr}\": {e}"))?;
            info!("fospd listening securely on {addr}");
            Some(listener)
        }
        None => None,
    };

    let state = ServerState::new(config, driver);
    info!("Server state initialized.");

    Ok(ServerContext {
        state,
        listener,
        secure_listener,
        acceptor,
        shutdown_tx,
    })
}

fn setup_driver(config: &Config) -> Result<Arc<dyn StorageDriver>> {
    match config.database.as_str() {
        "memory" => Ok(Arc::new(MemoryDriver::new(&config.basepath))),
        other => Err(anyhow!("Unknown database driver \"{other}\"")),
    }
}

/// Sets up the TLS acceptor when a secure listener is configured.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.listensecure.is_none() {
        return Ok(None);
    }
    info!("TLS is enabled. Loading certificate and key.");
    let (Some(certfile), Some(keyfile)) = (&config.certfile, &config.keyfile) else {
        return Err(anyhow!("'listensecure' requires 'certfile' and 'keyfile'"));
    };
    let certs = load_certs(certfile)?;
    let key = load_key(keyfile)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file =
        File::open(path).map_err(|e| anyhow!("Failed to open certificate file '{path}': {e}"))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{path}'"));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file =
        File::open(path).map_err(|e| anyhow!("Failed to open private key file '{path}': {e}"))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{path}'"))
}
