// src/connection/server.rs

//! The server side of a FOSP connection: bootstrap state, the identity of
//! the peer, and message routing once the connection is authenticated.

use super::bootstrap::{AuthenticationPayload, NegotiationPayload};
use super::{Connection, MessageHandler};
use crate::core::FospError;
use crate::core::protocol::{Message, Method, Request, Status};
use crate::core::state::ServerState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// The bootstrap state of a connection. Transitions are irreversible:
/// Opened → Negotiated → Authenticated → Closing → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Opened = 0,
    Negotiated = 1,
    Authenticated = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnState {
    fn from_u8(value: u8) -> ConnState {
        match value {
            0 => ConnState::Opened,
            1 => ConnState::Negotiated,
            2 => ConnState::Authenticated,
            3 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

/// A connection as seen by the server: either from a client of a local
/// user, or from (or to) a peer server of a remote domain.
pub struct ServerConnection {
    connection: Arc<Connection>,
    state: Arc<ServerState>,
    weak_self: Weak<ServerConnection>,
    /// The peer's TCP address; absent on connections we dialled ourselves.
    peer_addr: Option<SocketAddr>,
    conn_state: AtomicU8,
    /// The authenticated local user name, without the domain part.
    user: Mutex<Option<String>>,
    /// The authenticated remote peer domain.
    remote_domain: Mutex<Option<String>>,
}

impl ServerConnection {
    /// Wraps a freshly accepted connection. The bootstrap starts in
    /// `Opened` and the connection is not registered anywhere until the
    /// peer authenticates.
    pub fn accept(
        connection: Arc<Connection>,
        state: Arc<ServerState>,
        peer_addr: SocketAddr,
    ) -> Arc<ServerConnection> {
        let server_connection = Arc::new_cyclic(|weak_self| ServerConnection {
            connection: connection.clone(),
            state,
            weak_self: weak_self.clone(),
            peer_addr: Some(peer_addr),
            conn_state: AtomicU8::new(ConnState::Opened as u8),
            user: Mutex::new(None),
            remote_domain: Mutex::new(None),
        });
        connection.set_message_handler(server_connection.clone());
        server_connection
    }

    /// Dials a peer server, negotiates the protocol version and
    /// authenticates as a server for the local domain. The returned
    /// connection is ready for forwarding; the caller registers it.
    pub async fn open(
        state: &Arc<ServerState>,
        remote_domain: &str,
    ) -> Result<Arc<ServerConnection>, FospError> {
        let url = format!("ws://{remote_domain}:1337");
        info!("Opening new server connection to {url}");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| FospError::Gateway(format!("failed to connect to {remote_domain}: {e}")))?;
        let connection = Connection::spawn(ws, state.request_timeout());

        let server_connection = Arc::new_cyclic(|weak_self| ServerConnection {
            connection: connection.clone(),
            state: state.clone(),
            weak_self: weak_self.clone(),
            peer_addr: None,
            // Outgoing connections never bootstrap on our side.
            conn_state: AtomicU8::new(ConnState::Authenticated as u8),
            user: Mutex::new(None),
            remote_domain: Mutex::new(Some(remote_domain.to_string())),
        });
        connection.set_message_handler(server_connection.clone());

        let negotiation = Request::new(Method::Connect, None)
            .with_body(serde_json::to_vec(&NegotiationPayload::current())?);
        let response = connection.send_request(negotiation).await?;
        if response.status != Status::Succeeded {
            connection.close().await;
            return Err(FospError::Gateway(format!(
                "connection negotiation with {remote_domain} failed with code {}",
                response.code
            )));
        }

        let auth = Request::new(Method::Auth, None).with_body(serde_json::to_vec(
            &AuthenticationPayload::server(&state.config.localdomain),
        )?);
        let response = connection.send_request(auth).await?;
        if response.status != Status::Succeeded {
            connection.close().await;
            return Err(FospError::Gateway(format!(
                "server authentication with {remote_domain} failed with code {}",
                response.code
            )));
        }

        info!("Successfully negotiated and authenticated with {remote_domain}");
        Ok(server_connection)
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn conn_state(&self) -> ConnState {
        ConnState::from_u8(self.conn_state.load(Ordering::SeqCst))
    }

    pub(super) fn set_conn_state(&self, next: ConnState) {
        // State only ever moves forward.
        self.conn_state.fetch_max(next as u8, Ordering::SeqCst);
    }

    pub(super) fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(super) fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn local_user(&self) -> Option<String> {
        self.user.lock().clone()
    }

    pub fn remote_domain(&self) -> Option<String> {
        self.remote_domain.lock().clone()
    }

    /// Records the authenticated local user and registers this connection
    /// under its routing key.
    pub(super) async fn promote_to_user(&self, user: &str) {
        *self.user.lock() = Some(user.to_string());
        self.set_conn_state(ConnState::Authenticated);
        if let Some(this) = self.weak_self.upgrade() {
            self.state
                .registry
                .register(&format!("{user}@"), this)
                .await;
        }
    }

    /// Records the authenticated peer domain and registers this connection
    /// under its routing key.
    pub(super) async fn promote_to_server(&self, domain: &str) {
        *self.remote_domain.lock() = Some(domain.to_string());
        self.set_conn_state(ConnState::Authenticated);
        if let Some(this) = self.weak_self.upgrade() {
            self.state
                .registry
                .register(&format!("@{}", domain.to_ascii_lowercase()), this)
                .await;
        }
    }

    fn registry_key(&self) -> Option<String> {
        if let Some(user) = self.user.lock().as_ref() {
            return Some(format!("{user}@"));
        }
        self.remote_domain
            .lock()
            .as_ref()
            .map(|domain| format!("@{}", domain.to_ascii_lowercase()))
    }
}

#[async_trait]
impl MessageHandler for ServerConnection {
    async fn handle_message(&self, message: Message) {
        match self.conn_state() {
            ConnState::Authenticated => self.handle_authenticated(message).await,
            ConnState::Opened | ConnState::Negotiated => match message {
                Message::Request(request) => self.bootstrap(request).await,
                other => {
                    warn!("Discarding {other} on a connection that is still bootstrapping");
                }
            },
            ConnState::Closing | ConnState::Closed => {
                debug!("Discarding {message} on a closing connection");
            }
        }
    }

    async fn handle_close(&self) {
        self.set_conn_state(ConnState::Closed);
        if let Some(key) = self.registry_key() {
            self.state.registry.deregister(&key, self).await;
        }
    }
}
