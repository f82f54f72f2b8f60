// src/server/listener.rs

//! Contains the main accept loop: WebSocket upgrades, optional TLS
//! handshakes, and graceful shutdown on SIGINT/SIGTERM.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::{Connection, ServerConnection};
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// The main accept loop. Runs until a shutdown signal arrives.
pub async fn run(context: ServerContext) {
    let mut handshake_tasks = JoinSet::new();
    let secure_listener = context.secure_listener;

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal() => {
                break;
            },

            res = context.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new connection from {addr}");
                        let state = context.state.clone();
                        handshake_tasks.spawn(async move {
                            accept_connection(AnyStream::Tcp(socket), addr, state).await;
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {e}"),
                }
            },

            res = accept_secure(&secure_listener), if secure_listener.is_some() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new secure connection from {addr}");
                        let state = context.state.clone();
                        let Some(acceptor) = context.acceptor.clone() else {
                            warn!("Secure listener without a TLS acceptor, dropping {addr}");
                            continue;
                        };
                        handshake_tasks.spawn(async move {
                            match acceptor.accept(socket).await {
                                Ok(tls_stream) => {
                                    accept_connection(AnyStream::Tls(Box::new(tls_stream)), addr, state).await;
                                }
                                Err(e) => warn!("TLS handshake error for {addr}: {e}"),
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept secure connection: {e}"),
                }
            },

            // Reap completed handshake tasks.
            Some(res) = handshake_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection handshake panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down.");
    if context.shutdown_tx.send(()).is_err() {
        // Nothing was listening; the accept loop was the only task.
    }
    handshake_tasks.shutdown().await;
    info!("Server shutdown complete.");
}

async fn accept_secure(
    listener: &Option<TcpListener>,
) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Upgrades a raw stream to a WebSocket and hands it to a new
/// `ServerConnection`, which then lives on its own reader/writer tasks.
async fn accept_connection(stream: AnyStream, addr: SocketAddr, state: Arc<ServerState>) {
    match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => {
            let connection = Connection::spawn(ws, state.request_timeout());
            ServerConnection::accept(connection, state, addr);
        }
        Err(e) => warn!("WebSocket handshake failed for {addr}: {e}"),
    }
}
