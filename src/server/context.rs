// src/server/context.rs

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

/// Everything the accept loop needs, assembled during initialization.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: TcpListener,
    pub secure_listener: Option<TcpListener>,
    pub acceptor: Option<TlsAcceptor>,
    pub shutdown_tx: broadcast::Sender<()>,
}
